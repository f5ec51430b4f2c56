//! EVCC state machine (spec §4.5): drives one charging session as the
//! client role over an already-accepted transport stream.
//!
//! Follows the step contract verbatim: on entry to each state, consult the
//! controller for the next request's inputs, send it, arm the
//! state's timer, await the paired response, and advance -- or abort. The
//! loop itself (`CurrentDemand`/`ChargingStatus`) and renegotiation are the
//! two deviations from strict linear advance, both handled here rather
//! than in [`crate::router`], since both depend on message content the
//! router does not see.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::codec;
use crate::config::DialectTimers;
use crate::controller::EvccController;
use crate::error::{Error, Result};
use crate::message::{
    Body, ChargingSessionDirective, Dialect, Direction, EvseNotification, Message, MessageKind,
    PowerDeliveryAction, Role, Session, SessionState, TerminationReason,
};
use crate::router;
use crate::transport::{FrameReader, FrameWriter};

/// Running context accumulated from responses, since later requests
/// depend on what an earlier response offered (spec §4.6: "validate ...
/// are ones the SECC offered in the prior response" is the SECC's job,
/// but the EVCC must remember the same facts to construct valid requests).
#[derive(Default)]
struct ExchangeContext {
    offered_modes: Vec<crate::message::EnergyTransferMode>,
    chosen_mode: Option<crate::message::EnergyTransferMode>,
    schedule: Option<crate::message::ChargingSchedule>,
    stop_requested: bool,
}

/// Drives one EVCC session over `stream` to completion, returning the
/// [`TerminationReason`] it ended with. Never panics on protocol/transport
/// faults: every failure path resolves to a `TerminationReason` or
/// propagates a session-fatal [`Error`] for the caller to log via
/// [`crate::error::Diagnostic`].
pub struct EvccEngine<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    controller: Arc<dyn EvccController>,
    dialect: Dialect,
    timers: DialectTimers,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> EvccEngine<S> {
    pub fn new(stream: S, dialect: Dialect, controller: Arc<dyn EvccController>) -> Self {
        let (r, w) = tokio::io::split(stream);
        EvccEngine {
            reader: FrameReader::new(r),
            writer: FrameWriter::new(w),
            controller,
            dialect,
            timers: DialectTimers::for_dialect(dialect),
        }
    }

    pub async fn run(mut self, use_tls: bool) -> Result<TerminationReason> {
        let mut session = Session::new(Role::Evcc, self.dialect, use_tls);
        let mut ctx = ExchangeContext::default();

        loop {
            let body = self.build_request(session.state, &ctx).await?;
            if let Body::ChargeParameterDiscoveryReq { energy_transfer_mode, .. } = &body {
                ctx.chosen_mode = Some(*energy_transfer_mode);
            }
            let request_kind = body.kind();
            let request = Message {
                dialect: self.dialect,
                session_id: session.id,
                direction: Direction::Request,
                kind: request_kind,
                body,
            };
            self.send(&request).await?;

            let timeout = self.timer_for(session.state, request_kind);
            let response = match tokio::time::timeout(timeout, self.recv()).await {
                Ok(result) => result?,
                Err(_) => {
                    self.best_effort_stop(&mut session, ChargingSessionDirective::Terminate).await;
                    return Ok(TerminationReason::Timeout);
                }
            };

            if let Some(id) = response.session_id {
                match session.id {
                    None => session.assign_id(id),
                    Some(existing) if existing != id => {
                        return Err(Error::Protocol(format!(
                            "SECC response carried session id {id} but session was assigned {existing}"
                        )))
                    }
                    Some(_) => {}
                }
            }

            if let Some(code) = response.body.response_code() {
                if code.is_failure() {
                    session.state = SessionState::Terminated(TerminationReason::Protocol);
                    return Ok(TerminationReason::Protocol);
                }
            }

            let mut accepted = router::accept(session.state, response.kind())?;
            if renegotiation_requested(&response.body) {
                accepted = router::apply_renegotiation(accepted);
            }
            absorb_response(&mut ctx, &response.body);
            if let Some(schedule) = &ctx.schedule {
                session.schedule = Some(schedule.clone());
            }
            session.state = accepted.next_state;

            if session.state == SessionState::SessionStop {
                session.state = SessionState::Terminated(TerminationReason::Ok);
                return Ok(TerminationReason::Ok);
            }

            if session.state == SessionState::CurrentDemand
                && (self.controller.charging_should_stop().await || evse_stop_requested(&response.body))
            {
                ctx.stop_requested = true;
            }
        }
    }

    /// Construct the request body for the state the session currently
    /// occupies (the name of a [`SessionState`] names the phase just
    /// completed; this builds the *next* one, per spec §4.5's sequence).
    async fn build_request(&self, state: SessionState, ctx: &ExchangeContext) -> Result<Body> {
        use SessionState::*;
        let prefs = self.controller.preferences();
        let body = match state {
            Idle => Body::SupportedAppProtocolReq {
                supported_dialects: vec![Dialect::Di2, Dialect::Di20],
            },
            SessionState::SupportedAppProtocol => {
                Body::SessionSetupReq { evcc_id: self.controller.evcc_id() }
            }
            SessionSetup => Body::ServiceDiscoveryReq,
            ServiceDiscovery | ServiceDetail => {
                Body::PaymentServiceSelectionReq { payment_method: prefs.payment_method, selected_service: 1 }
            }
            PaymentServiceSelection => match prefs.payment_method {
                crate::message::PaymentMethod::PnC => {
                    Body::CertificateInstallationReq { contract_certificate_chain: Vec::new() }
                }
                crate::message::PaymentMethod::Eim => Body::AuthorizationReq { signature: None },
            },
            CertificateInstallation => {
                Body::PaymentDetailsReq { contract_certificate_chain: Vec::new() }
            }
            PaymentDetails => Body::AuthorizationReq { signature: None },
            Authorization => {
                let mode = self
                    .controller
                    .choose_energy_mode(&ctx.offered_modes)
                    .unwrap_or(crate::message::EnergyTransferMode::AcThreePhase);
                let max_power = self.controller.max_power().await?;
                Body::ChargeParameterDiscoveryReq { energy_transfer_mode: mode, max_power }
            }
            ChargeParameterDiscovery => Body::CableCheckReq,
            CableCheck => {
                let target_voltage = ctx
                    .schedule
                    .as_ref()
                    .and_then(|s| s.limit_at(Duration::ZERO))
                    .unwrap_or(self.controller.max_power().await?);
                Body::PreChargeReq { target_voltage }
            }
            PreCharge => Body::PowerDeliveryReq { action: PowerDeliveryAction::Start },
            PowerDeliveryStart => self.build_loop_request(ctx).await?,
            SessionState::CurrentDemand => {
                if ctx.stop_requested {
                    Body::PowerDeliveryReq { action: PowerDeliveryAction::Stop }
                } else {
                    self.build_loop_request(ctx).await?
                }
            }
            PowerDeliveryStop => {
                Body::SessionStopReq { directive: ChargingSessionDirective::Terminate }
            }
            WeldingDetection => {
                Body::SessionStopReq { directive: ChargingSessionDirective::Terminate }
            }
            SessionStop | Terminated(_) => {
                return Err(Error::Protocol(format!("no request to build from state {state:?}")))
            }
        };
        Ok(body)
    }

    async fn build_loop_request(&self, ctx: &ExchangeContext) -> Result<Body> {
        use crate::message::EnergyTransferMode::*;
        let is_dc = matches!(ctx.chosen_mode, Some(DcExtended | DcCombo | DcUnique));
        let limit = ctx
            .schedule
            .as_ref()
            .and_then(|s| s.limit_at(Duration::ZERO))
            .unwrap_or(self.controller.max_power().await?);
        if is_dc {
            let target_current = self.controller.requested_current(limit).await?;
            Ok(Body::CurrentDemandReq { target_current })
        } else {
            Ok(Body::ChargingStatusReq)
        }
    }

    /// Per-state timer (spec §4.5 Step contract): performance timeout for
    /// the performance-critical `CurrentDemand` exchange, ongoing timeout
    /// for the rest of the charging-loop cadence, sequence timeout
    /// otherwise.
    fn timer_for(&self, state: SessionState, kind: MessageKind) -> Duration {
        match kind {
            MessageKind::CurrentDemand => self.timers.performance_timeout,
            MessageKind::ChargingStatus => self.timers.ongoing_timeout,
            _ if state == SessionState::PowerDeliveryStart || state == SessionState::CurrentDemand => {
                self.timers.ongoing_timeout
            }
            _ => self.timers.sequence_timeout,
        }
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        let frame = codec::encode(message, self.dialect)?;
        self.writer.write_frame(&frame).await
    }

    async fn recv(&mut self) -> Result<Message> {
        let frame = self
            .reader
            .read_frame()
            .await?
            .ok_or_else(|| Error::Transport("connection closed before response arrived".into()))?;
        let (_, message) = codec::decode(&frame)?;
        Ok(message)
    }

    /// Best-effort graceful abort (spec §4.5: "yields a graceful abort via
    /// `SessionStop` when possible"). Never returns an error: a failure to
    /// send the stop is no worse than the hard close that would otherwise
    /// happen.
    async fn best_effort_stop(&mut self, session: &mut Session, directive: ChargingSessionDirective) {
        session.state = SessionState::Terminated(TerminationReason::Timeout);
        let stop = Message {
            dialect: self.dialect,
            session_id: session.id,
            direction: Direction::Request,
            kind: MessageKind::SessionStop,
            body: Body::SessionStopReq { directive },
        };
        let _ = self.send(&stop).await;
    }
}

fn renegotiation_requested(body: &Body) -> bool {
    matches!(
        body,
        Body::CurrentDemandRes { evse_notification: EvseNotification::ReNegotiate, .. }
            | Body::ChargingStatusRes { evse_notification: EvseNotification::ReNegotiate, .. }
    )
}

/// Whether the just-accepted `CurrentDemandRes`/`ChargingStatusRes` carries
/// `EVSENotification=Stop` (spec §4.5 Loops: "EVSE-requested stop via
/// `EVSENotification=Stop`"). Checked alongside the controller's own
/// `charging_should_stop()` so an EVSE-initiated stop ends the loop even
/// when the EVCC side has no reason of its own to stop yet.
fn evse_stop_requested(body: &Body) -> bool {
    matches!(
        body,
        Body::CurrentDemandRes { evse_notification: EvseNotification::Stop, .. }
            | Body::ChargingStatusRes { evse_notification: EvseNotification::Stop, .. }
    )
}

fn absorb_response(ctx: &mut ExchangeContext, body: &Body) {
    match body {
        Body::ServiceDiscoveryRes { offered_modes, .. } => {
            ctx.offered_modes = offered_modes.clone();
        }
        Body::ChargeParameterDiscoveryRes { schedule, .. } => {
            ctx.schedule = Some(schedule.clone());
        }
        _ => {}
    }
}
