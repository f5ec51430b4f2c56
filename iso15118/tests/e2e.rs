//! End-to-end scenarios (spec §8 S1, S3, S5, S6): both engines driven
//! concurrently over an in-process `tokio::io::duplex` pair standing in
//! for the TCP/TLS stream, using the simulator controllers or a minimal
//! local stand-in where the scenario needs to steer the simulator's
//! otherwise-deterministic behavior.
//!
//! S2 (TLS-enforced mismatch) and the SDP refusal it produces are covered
//! at the unit level in `transport::sdp`'s own tests; S4 (expired
//! contract certificate) would require a real signed X.509 chain, which
//! is out of reach without running a CA tool, so it is left to manual/CI
//! verification against real PKI fixtures rather than asserted here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use iso15118::controller::{
    AuthorizationDecision, AuthorizationPreference, EnergyLimits, EvccController,
    ScheduleRequirements, SeccController,
};
use iso15118::controller::simulated::{SimulatedEvccController, SimulatedSeccController};
use iso15118::error::Result;
use iso15118::evcc::EvccEngine;
use iso15118::message::{ChargingSchedule, Dialect, EnergyTransferMode, PaymentMethod, Power, ScheduleEntry, TerminationReason};
use iso15118::secc::SeccEngine;
use iso15118::security::TrustStore;
use iso15118::session::SessionStore;

fn new_pair() -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
    tokio::io::duplex(64 * 1024)
}

#[tokio::test]
async fn s1_happy_path_ac_eim_no_tls_dialect_2() {
    let (evcc_end, secc_end) = new_pair();

    // start_soc already at/above target_soc: the loop stops after exactly
    // one ChargingStatus round, satisfying "≥1 ChargingStatus exchange".
    let evcc_controller = Arc::new(SimulatedEvccController::new("EVCC-S1", 0.85, 0.8));
    let secc_controller = Arc::new(SimulatedSeccController::new("EVSE-S1"));
    let trust_store = Arc::new(TrustStore::new());
    let store = SessionStore::new();

    let secc = SeccEngine::new(secc_end, secc_controller, trust_store, store.clone());
    let evcc = EvccEngine::new(evcc_end, Dialect::Di2, evcc_controller);

    let (secc_result, evcc_result) = tokio::join!(secc.run(), evcc.run(false));

    assert_eq!(secc_result.unwrap(), TerminationReason::Ok);
    assert_eq!(evcc_result.unwrap(), TerminationReason::Ok);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn s3_bad_session_id_closes_with_failed_unknown_session() {
    // The SECC engine only ever echoes the session id it assigned; to
    // exercise the FAILED_UnknownSession path directly we drive the SECC
    // side of the wire by hand rather than through `EvccEngine`, since the
    // EVCC never constructs an inconsistent session id itself.
    use iso15118::codec;
    use iso15118::message::{Body, Direction, Message, MessageKind, SessionId};
    use iso15118::transport::{FrameReader, FrameWriter};

    let (evcc_end, secc_end) = new_pair();
    let secc_controller = Arc::new(SimulatedSeccController::new("EVSE-S3"));
    let trust_store = Arc::new(TrustStore::new());
    let store = SessionStore::new();
    let secc = SeccEngine::new(secc_end, secc_controller, trust_store, store.clone());
    let secc_task = tokio::spawn(secc.run());

    let (r, w) = tokio::io::split(evcc_end);
    let mut reader = FrameReader::new(r);
    let mut writer = FrameWriter::new(w);

    fn encode_req(dialect: Dialect, session_id: Option<SessionId>, kind: MessageKind, body: Body) -> Vec<u8> {
        let msg = Message { dialect, session_id, direction: Direction::Request, kind, body };
        codec::encode(&msg, dialect).unwrap()
    }

    writer
        .write_frame(&encode_req(
            Dialect::Di2,
            None,
            MessageKind::SupportedAppProtocol,
            Body::SupportedAppProtocolReq { supported_dialects: vec![Dialect::Di2] },
        ))
        .await
        .unwrap();
    let frame = reader.read_frame().await.unwrap().unwrap();
    let (_, _resp) = codec::decode(&frame).unwrap();

    writer
        .write_frame(&encode_req(
            Dialect::Di2,
            None,
            MessageKind::SessionSetup,
            Body::SessionSetupReq { evcc_id: "EVCC-S3".into() },
        ))
        .await
        .unwrap();
    let frame = reader.read_frame().await.unwrap().unwrap();
    let (_, resp) = codec::decode(&frame).unwrap();
    let assigned = resp.session_id.expect("SessionSetupRes must carry the assigned session id");

    // Send the next request carrying a *different* session id.
    let mut bogus_bytes = assigned.as_bytes();
    bogus_bytes[0] = bogus_bytes[0].wrapping_add(1);
    let bogus = SessionId(bogus_bytes);
    writer
        .write_frame(&encode_req(Dialect::Di2, Some(bogus), MessageKind::ServiceDiscovery, Body::ServiceDiscoveryReq))
        .await
        .unwrap();

    let frame = reader.read_frame().await.unwrap().unwrap();
    let (_, resp) = codec::decode(&frame).unwrap();
    match resp.body {
        Body::ServiceDiscoveryRes { code, .. } => {
            assert_eq!(code, iso15118::message::ResponseCode::FailedUnknownSession);
        }
        other => panic!("expected ServiceDiscoveryRes, got {other:?}"),
    }

    let reason = secc_task.await.unwrap().unwrap();
    assert_eq!(reason, TerminationReason::Protocol);
    assert_eq!(store.len(), 1);
}

/// EVCC controller that always selects a DC mode, so the charging loop
/// uses `CurrentDemand` (and its 4.5s performance timeout) instead of
/// `ChargingStatus`.
struct DcPreferringEvccController {
    inner: SimulatedEvccController,
}

#[async_trait]
impl EvccController for DcPreferringEvccController {
    fn evcc_id(&self) -> String {
        self.inner.evcc_id()
    }

    fn choose_energy_mode(&self, offered: &[EnergyTransferMode]) -> Result<EnergyTransferMode> {
        offered
            .iter()
            .find(|m| matches!(m, EnergyTransferMode::DcCombo))
            .copied()
            .ok_or_else(|| iso15118::error::Error::Controller("no DC mode offered".into()))
    }

    fn preferences(&self) -> AuthorizationPreference {
        self.inner.preferences()
    }

    async fn present_soc(&self) -> Result<f64> {
        self.inner.present_soc().await
    }

    async fn target_soc(&self) -> Result<f64> {
        self.inner.target_soc().await
    }

    async fn max_power(&self) -> Result<Power> {
        self.inner.max_power().await
    }

    async fn requested_current(&self, schedule_limit: Power) -> Result<Power> {
        self.inner.requested_current(schedule_limit).await
    }

    async fn charging_should_stop(&self) -> bool {
        self.inner.charging_should_stop().await
    }

    async fn renegotiation_requested(&self) -> bool {
        false
    }
}

/// SECC controller that never responds to its first `CurrentDemand`
/// request, simulating the stall S5 describes; every other call delegates
/// to a normal simulated EVSE.
struct StallingSeccController {
    inner: SimulatedSeccController,
}

#[async_trait]
impl SeccController for StallingSeccController {
    fn evse_id(&self) -> String {
        self.inner.evse_id()
    }

    fn supported_energy_modes(&self) -> Vec<EnergyTransferMode> {
        self.inner.supported_energy_modes()
    }

    async fn is_authorized(&self) -> Result<AuthorizationDecision> {
        self.inner.is_authorized().await
    }

    async fn present_voltage(&self) -> Result<Power> {
        // Stalls past the 4.5s CurrentDemand performance timeout.
        tokio::time::sleep(Duration::from_secs(5)).await;
        self.inner.present_voltage().await
    }

    async fn present_current(&self) -> Result<Power> {
        self.inner.present_current().await
    }

    async fn limits(&self) -> Result<EnergyLimits> {
        self.inner.limits().await
    }

    async fn build_schedule(&self, requirements: ScheduleRequirements) -> Result<ChargingSchedule> {
        self.inner.build_schedule(requirements).await
    }

    async fn should_stop(&self) -> bool {
        false
    }
}

#[tokio::test(start_paused = true)]
async fn s5_performance_timeout_on_current_demand() {
    let (evcc_end, secc_end) = new_pair();

    let evcc_controller =
        Arc::new(DcPreferringEvccController { inner: SimulatedEvccController::new("EVCC-S5", 0.3, 0.8) });
    let secc_controller = Arc::new(StallingSeccController { inner: SimulatedSeccController::new("EVSE-S5") });
    let trust_store = Arc::new(TrustStore::new());
    let store = SessionStore::new();

    let secc = SeccEngine::new(secc_end, secc_controller, trust_store, store.clone());
    let evcc = EvccEngine::new(evcc_end, Dialect::Di2, evcc_controller);

    let secc_task = tokio::spawn(secc.run());
    let evcc_reason = evcc.run(false).await.unwrap();

    assert_eq!(evcc_reason, TerminationReason::Timeout);
    // The EVCC's best-effort SessionStop after the timeout races the
    // SECC's own read; either outcome is a correctly closed session.
    let _ = secc_task.await;
}

/// SECC controller that requests renegotiation on the very first loop
/// tick, then never again, so the scenario converges instead of looping
/// forever.
struct OneShotRenegotiatingSeccController {
    inner: SimulatedSeccController,
    already_renegotiated: Mutex<bool>,
}

#[async_trait]
impl SeccController for OneShotRenegotiatingSeccController {
    fn evse_id(&self) -> String {
        self.inner.evse_id()
    }

    fn supported_energy_modes(&self) -> Vec<EnergyTransferMode> {
        self.inner.supported_energy_modes()
    }

    async fn is_authorized(&self) -> Result<AuthorizationDecision> {
        self.inner.is_authorized().await
    }

    async fn present_voltage(&self) -> Result<Power> {
        self.inner.present_voltage().await
    }

    async fn present_current(&self) -> Result<Power> {
        self.inner.present_current().await
    }

    async fn limits(&self) -> Result<EnergyLimits> {
        self.inner.limits().await
    }

    async fn build_schedule(&self, requirements: ScheduleRequirements) -> Result<ChargingSchedule> {
        self.inner.build_schedule(requirements).await
    }

    async fn should_stop(&self) -> bool {
        false
    }

    async fn should_renegotiate(&self) -> bool {
        let mut done = self.already_renegotiated.lock();
        if *done {
            false
        } else {
            *done = true;
            true
        }
    }
}

/// EVCC controller wired to stop the loop only after it has observed a
/// renegotiation. `choose_energy_mode` is only ever consulted once per
/// `ChargeParameterDiscovery` round (spec §4.5), so a second call is itself
/// proof the EVCC looped back through it after `EVSENotification::ReNegotiate`
/// (spec §4.5 Renegotiation) -- that is what flips the flag here.
struct RenegotiationAwareEvccController {
    inner: SimulatedEvccController,
    charge_parameter_rounds: Mutex<u32>,
    seen_renegotiation: Mutex<bool>,
}

#[async_trait]
impl EvccController for RenegotiationAwareEvccController {
    fn evcc_id(&self) -> String {
        self.inner.evcc_id()
    }

    fn choose_energy_mode(&self, offered: &[EnergyTransferMode]) -> Result<EnergyTransferMode> {
        let mut rounds = self.charge_parameter_rounds.lock();
        *rounds += 1;
        if *rounds >= 2 {
            *self.seen_renegotiation.lock() = true;
        }
        self.inner.choose_energy_mode(offered)
    }

    fn preferences(&self) -> AuthorizationPreference {
        self.inner.preferences()
    }

    async fn present_soc(&self) -> Result<f64> {
        self.inner.present_soc().await
    }

    async fn target_soc(&self) -> Result<f64> {
        self.inner.target_soc().await
    }

    async fn max_power(&self) -> Result<Power> {
        self.inner.max_power().await
    }

    async fn requested_current(&self, schedule_limit: Power) -> Result<Power> {
        self.inner.requested_current(schedule_limit).await
    }

    async fn charging_should_stop(&self) -> bool {
        *self.seen_renegotiation.lock()
    }

    async fn renegotiation_requested(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn s6_renegotiation_returns_to_charge_parameter_discovery() {
    let (evcc_end, secc_end) = new_pair();

    let evcc_controller = Arc::new(RenegotiationAwareEvccController {
        inner: SimulatedEvccController::new("EVCC-S6", 0.3, 0.8),
        charge_parameter_rounds: Mutex::new(0),
        seen_renegotiation: Mutex::new(false),
    });
    let secc_controller = Arc::new(OneShotRenegotiatingSeccController {
        inner: SimulatedSeccController::new("EVSE-S6"),
        already_renegotiated: Mutex::new(false),
    });
    let trust_store = Arc::new(TrustStore::new());
    let store = SessionStore::new();

    let secc = SeccEngine::new(secc_end, secc_controller, trust_store, store.clone());
    let evcc = EvccEngine::new(evcc_end, Dialect::Di2, evcc_controller.clone());

    let (secc_result, evcc_result) = tokio::join!(secc.run(), evcc.run(false));

    assert_eq!(secc_result.unwrap(), TerminationReason::Ok);
    assert_eq!(evcc_result.unwrap(), TerminationReason::Ok);

    // choose_energy_mode was consulted a second time, so the EVCC really
    // did route back through ChargeParameterDiscovery after observing
    // EVSENotification::ReNegotiate, and still reached a clean stop after.
    assert!(*evcc_controller.seen_renegotiation.lock());
    assert_eq!(*evcc_controller.charge_parameter_rounds.lock(), 2);
}
