//! SECC state machine (spec §4.6): mirror of the EVCC as a responder, plus
//! the duties unique to the server role -- session id assignment,
//! cross-checking the EVCC's declared choices against what was offered,
//! and the authorization policy.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::codec;
use crate::config::DialectTimers;
use crate::controller::{AuthorizationDecision, ScheduleRequirements, SeccController};
use crate::error::{Error, Result};
use crate::message::{
    Body, Dialect, Direction, EnergyTransferMode, EvseNotification, Message, MessageKind,
    PaymentMethod, PowerDeliveryAction, ResponseCode, Role, Session, SessionId, SessionState,
    TerminationReason,
};
use crate::router;
use crate::security::{RootKind, SecurityError, TrustStore};
use crate::session::SessionStore;
use crate::transport::{FrameReader, FrameWriter};

/// Facts accumulated across the session that later requests are
/// cross-checked against (spec §4.6: "validate ... are ones the SECC
/// offered in the prior response").
#[derive(Default)]
struct OfferedState {
    energy_modes: Vec<EnergyTransferMode>,
    selected_mode: Option<EnergyTransferMode>,
    payment_method: Option<PaymentMethod>,
    /// Contract certificate chain presented via `CertificateInstallation`
    /// or `PaymentDetails`, leaf-first, kept for the PnC authorization
    /// check on the subsequent `AuthorizationReq` (spec §4.6).
    contract_chain: Option<Vec<Vec<u8>>>,
}

/// Contract certificates are ECDSA P-256/SHA-256 per the ISO 15118-2 PKI
/// profile (spec §4.7); legacy RSA chains are accepted for the root but
/// contract leaves always sign with this algorithm.
const CONTRACT_SIGNATURE_OID: &str = "1.2.840.10045.4.3.2";

pub struct SeccEngine<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    controller: Arc<dyn SeccController>,
    trust_store: Arc<TrustStore>,
    store: SessionStore,
    timers: DialectTimers,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> SeccEngine<S> {
    pub fn new(
        stream: S,
        controller: Arc<dyn SeccController>,
        trust_store: Arc<TrustStore>,
        store: SessionStore,
    ) -> Self {
        let (r, w) = tokio::io::split(stream);
        SeccEngine {
            reader: FrameReader::new(r),
            writer: FrameWriter::new(w),
            controller,
            trust_store,
            store,
            // Picked once the dialect is known, from the first request.
            timers: DialectTimers::for_dialect(Dialect::Di2),
        }
    }

    pub async fn run(mut self) -> Result<TerminationReason> {
        let first = self.recv_any_dialect().await?;
        let dialect = first.dialect;
        self.timers = DialectTimers::for_dialect(dialect);

        let mut session = Session::new(Role::Secc, dialect, false);
        let mut offered = OfferedState::default();
        let mut request = first.message;

        loop {
            let mut accepted = match router::accept(session.state, request.kind()) {
                Ok(accepted) => accepted,
                Err(_) => {
                    self.respond_failure(
                        dialect,
                        session.id,
                        request.kind(),
                        ResponseCode::FailedSequenceError,
                    )
                    .await?;
                    session.state = SessionState::Terminated(TerminationReason::Protocol);
                    self.store.upsert(session_key(session.id), session);
                    return Ok(TerminationReason::Protocol);
                }
            };

            if let Some(incoming_id) = request.session_id {
                match session.id {
                    Some(assigned) if assigned != incoming_id => {
                        self.respond_failure(
                            dialect,
                            session.id,
                            request.kind(),
                            ResponseCode::FailedUnknownSession,
                        )
                        .await?;
                        session.state = SessionState::Terminated(TerminationReason::Protocol);
                        self.store.upsert(session_key(session.id), session);
                        return Ok(TerminationReason::Protocol);
                    }
                    _ => {}
                }
            }

            match self.handle(&request, &mut session, &mut offered).await {
                Ok(response_body) => {
                    if renegotiation_sent(&response_body) {
                        accepted = router::apply_renegotiation(accepted);
                    }
                    let response = Message {
                        dialect,
                        session_id: session.id,
                        direction: Direction::Response,
                        kind: request.kind(),
                        body: response_body,
                    };
                    self.send(&response).await?;
                }
                Err(Error::Security(security_err)) => {
                    self.respond_failure(
                        dialect,
                        session.id,
                        request.kind(),
                        security_err.response_code(),
                    )
                    .await?;
                    session.state = SessionState::Terminated(TerminationReason::Security);
                    self.store.upsert(session_key(session.id), session);
                    return Ok(TerminationReason::Security);
                }
                Err(Error::Controller(_)) => {
                    self.respond_failure(
                        dialect,
                        session.id,
                        request.kind(),
                        ResponseCode::FailedSequenceError,
                    )
                    .await?;
                    session.state = SessionState::Terminated(TerminationReason::Controller);
                    self.store.upsert(session_key(session.id), session);
                    return Ok(TerminationReason::Controller);
                }
                Err(e) => return Err(e),
            }

            session.state = accepted.next_state;
            self.store.upsert(session_key(session.id), session.clone());

            if session.state == SessionState::SessionStop {
                session.state = SessionState::Terminated(TerminationReason::Ok);
                self.store.upsert(session_key(session.id), session);
                return Ok(TerminationReason::Ok);
            }

            let timeout = self.ongoing_timeout_for(session.state);
            request = match tokio::time::timeout(timeout, self.recv_typed(dialect)).await {
                Ok(result) => result?,
                Err(_) => {
                    session.state = SessionState::Terminated(TerminationReason::Timeout);
                    self.store.upsert(session_key(session.id), session);
                    return Ok(TerminationReason::Timeout);
                }
            };
        }
    }

    async fn handle(
        &self,
        request: &Message,
        session: &mut Session,
        offered: &mut OfferedState,
    ) -> Result<Body> {
        let body = match &request.body {
            Body::SupportedAppProtocolReq { supported_dialects } => {
                let selected = *supported_dialects
                    .iter()
                    .find(|d| **d == request.dialect)
                    .ok_or_else(|| Error::Protocol("no common dialect".into()))?;
                Body::SupportedAppProtocolRes { selected, code: ResponseCode::Ok }
            }
            Body::SessionSetupReq { .. } => {
                let id = SessionId(new_session_bytes());
                session.assign_id(id);
                Body::SessionSetupRes {
                    evse_id: self.controller.evse_id(),
                    code: ResponseCode::OkNewSessionEstablished,
                }
            }
            Body::ServiceDiscoveryReq => {
                offered.energy_modes = self.controller.supported_energy_modes();
                Body::ServiceDiscoveryRes {
                    offered_modes: offered.energy_modes.clone(),
                    code: ResponseCode::Ok,
                }
            }
            Body::ServiceDetailReq { .. } => Body::ServiceDetailRes { code: ResponseCode::Ok },
            Body::PaymentServiceSelectionReq { payment_method, selected_service: _ } => {
                offered.payment_method = Some(*payment_method);
                Body::PaymentServiceSelectionRes { code: ResponseCode::Ok }
            }
            Body::CertificateInstallationReq { contract_certificate_chain } => {
                offered.contract_chain = Some(contract_certificate_chain.clone());
                Body::CertificateInstallationRes {
                    contract_certificate_chain: contract_certificate_chain.clone(),
                    code: ResponseCode::Ok,
                }
            }
            Body::PaymentDetailsReq { contract_certificate_chain } => {
                if offered.contract_chain.is_none() {
                    offered.contract_chain = Some(contract_certificate_chain.clone());
                }
                Body::PaymentDetailsRes { challenge: [0u8; 16], code: ResponseCode::Ok }
            }
            Body::AuthorizationReq { signature } => {
                if offered.payment_method == Some(PaymentMethod::PnC) {
                    self.authorize_pnc(request, signature.as_deref(), offered)?;
                    Body::AuthorizationRes { authorized: true, code: ResponseCode::Ok }
                } else {
                    let decision = self.controller.is_authorized().await?;
                    match decision {
                        AuthorizationDecision::Accepted => {
                            Body::AuthorizationRes { authorized: true, code: ResponseCode::Ok }
                        }
                        AuthorizationDecision::Ongoing => {
                            Body::AuthorizationRes { authorized: false, code: ResponseCode::Ok }
                        }
                        AuthorizationDecision::Rejected => {
                            return Err(Error::Controller("authorization rejected".into()))
                        }
                    }
                }
            }
            Body::ChargeParameterDiscoveryReq { energy_transfer_mode, max_power } => {
                if !offered.energy_modes.contains(energy_transfer_mode) {
                    return Err(Error::Protocol(format!(
                        "EVCC selected energy mode {energy_transfer_mode:?} that was never offered"
                    )));
                }
                offered.selected_mode = Some(*energy_transfer_mode);
                let limits = self.controller.limits().await?;
                let schedule = self
                    .controller
                    .build_schedule(ScheduleRequirements {
                        energy_transfer_mode: *energy_transfer_mode,
                        requested_max_power: *max_power,
                        evse_limits: limits,
                    })
                    .await?;
                session.energy_transfer_mode = Some(*energy_transfer_mode);
                session.schedule = Some(schedule.clone());
                Body::ChargeParameterDiscoveryRes { schedule, code: ResponseCode::Ok }
            }
            Body::CableCheckReq => Body::CableCheckRes { code: ResponseCode::Ok },
            Body::PreChargeReq { .. } => {
                let present_voltage = self.controller.present_voltage().await?;
                Body::PreChargeRes { present_voltage, code: ResponseCode::Ok }
            }
            Body::PowerDeliveryReq { action } => {
                match action {
                    PowerDeliveryAction::Start => {}
                    PowerDeliveryAction::Stop => {}
                }
                Body::PowerDeliveryRes { code: ResponseCode::Ok }
            }
            Body::CurrentDemandReq { target_current: _ } => {
                let present_voltage = self.controller.present_voltage().await?;
                let present_current = self.controller.present_current().await?;
                let notification = self.loop_notification().await;
                Body::CurrentDemandRes {
                    present_voltage,
                    present_current,
                    evse_notification: notification,
                    code: ResponseCode::Ok,
                }
            }
            Body::ChargingStatusReq => {
                let present_current = self.controller.present_current().await?;
                let notification = self.loop_notification().await;
                Body::ChargingStatusRes {
                    present_power: present_current,
                    evse_notification: notification,
                    code: ResponseCode::Ok,
                }
            }
            Body::WeldingDetectionReq => Body::WeldingDetectionRes { code: ResponseCode::Ok },
            Body::SessionStopReq { .. } => Body::SessionStopRes { code: ResponseCode::Ok },
            other => {
                return Err(Error::Protocol(format!(
                    "request body {:?} has no SECC handler",
                    other.kind()
                )))
            }
        };
        Ok(body)
    }

    /// PnC authorization policy (spec §4.6): accepted iff the contract
    /// certificate chain installed earlier in the session validates
    /// against the contract trust anchor, the chain's leaf is not in the
    /// local revocation set, and the detached signature on `request`
    /// verifies against that leaf's public key over the canonical-EXI
    /// encoding of the request with the signature field cleared (spec
    /// §4.7: the verifier must reconstruct the exact canonical encoding
    /// the signer used).
    fn authorize_pnc(
        &self,
        request: &Message,
        signature: Option<&[u8]>,
        offered: &OfferedState,
    ) -> Result<()> {
        let chain_der = offered.contract_chain.as_ref().filter(|c| !c.is_empty()).ok_or_else(|| {
            Error::Security(SecurityError::CertChainError(
                "PnC authorization requested but no contract certificate chain was installed"
                    .into(),
            ))
        })?;
        let signature = signature.ok_or_else(|| {
            Error::Security(SecurityError::SignatureError(
                "PnC AuthorizationReq carried no detached signature".into(),
            ))
        })?;

        let mut arena = crate::security::CertificateArena::new();
        let indices: Vec<_> = chain_der.iter().cloned().map(|der| arena.insert(der)).collect();
        let leaf_idx = indices[0];

        if self.trust_store.is_revoked(&chain_der[0]) {
            return Err(SecurityError::Revoked("contract certificate is revoked".into()).into());
        }
        crate::security::validate_chain(
            &arena,
            &crate::security::CertificateChain(indices),
            &self.trust_store,
            RootKind::ContractRoot,
            SystemTime::now(),
        )?;

        let leaf_public_key = crate::security::leaf_public_key_der(&arena, leaf_idx)?;
        let canonical = crate::codec::exi::encode_message(&Message {
            dialect: request.dialect,
            session_id: request.session_id,
            direction: request.direction,
            kind: request.kind,
            body: Body::AuthorizationReq { signature: None },
        })?;
        crate::security::verify_detached_signature(
            &canonical,
            signature,
            &leaf_public_key,
            CONTRACT_SIGNATURE_OID,
        )
        .map_err(Error::from)
    }

    /// `EVSENotification` for a `CurrentDemandRes`/`ChargingStatusRes`
    /// (spec §4.5 Loops, Renegotiation): `Stop` wins over `ReNegotiate` if
    /// the controller somehow raises both in the same tick.
    async fn loop_notification(&self) -> EvseNotification {
        if self.controller.should_stop().await {
            EvseNotification::Stop
        } else if self.controller.should_renegotiate().await {
            EvseNotification::ReNegotiate
        } else {
            EvseNotification::None
        }
    }

    fn ongoing_timeout_for(&self, state: SessionState) -> Duration {
        match state {
            SessionState::CurrentDemand => self.timers.performance_timeout,
            _ => self.timers.sequence_timeout,
        }
    }

    async fn respond_failure(
        &mut self,
        dialect: Dialect,
        session_id: Option<SessionId>,
        kind: MessageKind,
        code: ResponseCode,
    ) -> Result<()> {
        let body = failure_body(kind, code);
        let response =
            Message { dialect, session_id, direction: Direction::Response, kind, body };
        self.send(&response).await
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        let frame = codec::encode(message, message.dialect)?;
        self.writer.write_frame(&frame).await
    }

    async fn recv_any_dialect(&mut self) -> Result<DecodedFrame> {
        let frame = self
            .reader
            .read_frame()
            .await?
            .ok_or_else(|| Error::Transport("connection closed before first request".into()))?;
        let (dialect, message) = codec::decode(&frame)?;
        Ok(DecodedFrame { dialect, message })
    }

    async fn recv_typed(&mut self, expected: Dialect) -> Result<Message> {
        let decoded = self.recv_any_dialect().await?;
        if decoded.dialect != expected {
            return Err(Error::Protocol(format!(
                "dialect changed mid-session from {expected:?} to {:?}",
                decoded.dialect
            )));
        }
        Ok(decoded.message)
    }
}

struct DecodedFrame {
    dialect: Dialect,
    message: Message,
}

fn failure_body(kind: MessageKind, code: ResponseCode) -> Body {
    use MessageKind::*;
    match kind {
        SupportedAppProtocol => Body::SupportedAppProtocolRes { selected: Dialect::Di2, code },
        SessionSetup => Body::SessionSetupRes { evse_id: String::new(), code },
        ServiceDiscovery => Body::ServiceDiscoveryRes { offered_modes: Vec::new(), code },
        ServiceDetail => Body::ServiceDetailRes { code },
        PaymentServiceSelection => Body::PaymentServiceSelectionRes { code },
        CertificateInstallation => {
            Body::CertificateInstallationRes { contract_certificate_chain: Vec::new(), code }
        }
        PaymentDetails => Body::PaymentDetailsRes { challenge: [0u8; 16], code },
        Authorization => Body::AuthorizationRes { authorized: false, code },
        ChargeParameterDiscovery => {
            Body::ChargeParameterDiscoveryRes { schedule: Default::default(), code }
        }
        CableCheck => Body::CableCheckRes { code },
        PreCharge => Body::PreChargeRes {
            present_voltage: crate::message::Power::new(0, 0),
            code,
        },
        PowerDelivery => Body::PowerDeliveryRes { code },
        CurrentDemand => Body::CurrentDemandRes {
            present_voltage: crate::message::Power::new(0, 0),
            present_current: crate::message::Power::new(0, 0),
            evse_notification: EvseNotification::None,
            code,
        },
        ChargingStatus => Body::ChargingStatusRes {
            present_power: crate::message::Power::new(0, 0),
            evse_notification: EvseNotification::None,
            code,
        },
        WeldingDetection => Body::WeldingDetectionRes { code },
        SessionStop => Body::SessionStopRes { code },
    }
}

/// Mirrors `evcc::renegotiation_requested` on the outgoing side: once this
/// response carries `EVSENotification::ReNegotiate`, the SECC's own session
/// state must jump back to `Authorization` too, or the next incoming
/// `ChargeParameterDiscoveryReq` fails `router::accept`'s sequence check.
fn renegotiation_sent(body: &Body) -> bool {
    matches!(
        body,
        Body::CurrentDemandRes { evse_notification: EvseNotification::ReNegotiate, .. }
            | Body::ChargingStatusRes { evse_notification: EvseNotification::ReNegotiate, .. }
    )
}

fn session_key(id: Option<SessionId>) -> SessionId {
    id.unwrap_or(SessionId([0; 8]))
}

fn new_session_bytes() -> [u8; 8] {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    (nanos as u64).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{AuthorizationDecision, EnergyLimits, ScheduleRequirements};
    use crate::message::{ChargingSchedule, Power};
    use async_trait::async_trait;

    #[test]
    fn failure_body_carries_the_requested_code() {
        let body = failure_body(MessageKind::SessionSetup, ResponseCode::FailedUnknownSession);
        assert_eq!(body.response_code(), Some(ResponseCode::FailedUnknownSession));
    }

    /// Stub controller whose `should_stop`/`should_renegotiate` flags are
    /// set directly by the test, to drive [`SeccEngine::loop_notification`]
    /// without wiring up a whole session.
    struct StubController {
        should_stop: bool,
        should_renegotiate: bool,
    }

    #[async_trait]
    impl SeccController for StubController {
        fn evse_id(&self) -> String {
            "EVSE-TEST".into()
        }

        fn supported_energy_modes(&self) -> Vec<EnergyTransferMode> {
            vec![EnergyTransferMode::AcThreePhase]
        }

        async fn is_authorized(&self) -> Result<AuthorizationDecision> {
            Ok(AuthorizationDecision::Accepted)
        }

        async fn present_voltage(&self) -> Result<Power> {
            Ok(Power::new(0, 0))
        }

        async fn present_current(&self) -> Result<Power> {
            Ok(Power::new(0, 0))
        }

        async fn limits(&self) -> Result<EnergyLimits> {
            Ok(EnergyLimits { max_voltage: Power::new(0, 0), max_current: Power::new(0, 0) })
        }

        async fn build_schedule(&self, _requirements: ScheduleRequirements) -> Result<ChargingSchedule> {
            Ok(ChargingSchedule::default())
        }

        async fn should_stop(&self) -> bool {
            self.should_stop
        }

        async fn should_renegotiate(&self) -> bool {
            self.should_renegotiate
        }
    }

    fn engine_with(controller: StubController) -> SeccEngine<tokio::io::DuplexStream> {
        let (stream, _peer) = tokio::io::duplex(64);
        SeccEngine::new(
            stream,
            Arc::new(controller),
            Arc::new(TrustStore::new()),
            SessionStore::new(),
        )
    }

    #[tokio::test]
    async fn loop_notification_is_none_when_nothing_is_raised() {
        let engine = engine_with(StubController { should_stop: false, should_renegotiate: false });
        assert_eq!(engine.loop_notification().await, EvseNotification::None);
    }

    #[tokio::test]
    async fn loop_notification_surfaces_renegotiate() {
        let engine = engine_with(StubController { should_stop: false, should_renegotiate: true });
        assert_eq!(engine.loop_notification().await, EvseNotification::ReNegotiate);
    }

    #[tokio::test]
    async fn loop_notification_prefers_stop_over_renegotiate() {
        let engine = engine_with(StubController { should_stop: true, should_renegotiate: true });
        assert_eq!(engine.loop_notification().await, EvseNotification::Stop);
    }
}
