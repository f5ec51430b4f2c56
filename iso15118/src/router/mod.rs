//! Message router (spec §4.4): the sole authority on request/response
//! pairing and on timer cancellation.
//!
//! Given the session's current [`SessionState`] and the [`MessageKind`] of
//! a freshly decoded message, [`accept`] looks up the transition table and
//! either returns the state to advance to, or [`Error::Protocol`] for any
//! `(state, kind)` pair the table does not recognize -- the
//! `UnexpectedMessage` case of spec §4.4, which the caller maps to
//! `FAILED_SEQUENCE_ERROR` and session termination. There is no dynamic
//! dispatch on message type (spec §9 Design Notes): this is a plain match
//! over a tagged pair.
//!
//! The table is deliberately generic over role: the EVCC consults it to
//! check an arriving response against the request it just sent, and the
//! SECC consults it to check an arriving request against what it last
//! offered, since the abridged state names are shared between both roles
//! (spec §4.5/§4.6).

use crate::error::{Error, Result};
use crate::message::{MessageKind, SessionState};

/// The outcome of accepting a message: the state the session advances to.
/// Acceptance is itself the signal that pairing succeeded -- the caller
/// cancels the request's armed timer immediately upon receiving `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub next_state: SessionState,
}

/// Validate that `kind` is expected while the session is in `state`
/// (spec §4.4). Optional phases (`ServiceDetail`, the
/// `CertificateInstallation`/`PaymentDetails` split, `WeldingDetection`)
/// are modeled as multiple valid kinds from the same state; the
/// `CurrentDemand`/`ChargingStatus` loop is a self-transition.
///
/// Renegotiation (`EVSENotification=ReNegotiate`, spec §4.5) is not a
/// function of `(state, kind)` alone -- it depends on a field inside an
/// otherwise ordinarily-paired `CurrentDemandRes`/`ChargingStatusRes` -- so
/// it is not in this table; the state machine inspects the body after
/// the router has accepted the pairing and may override the state this
/// function returns.
pub fn accept(state: SessionState, kind: MessageKind) -> Result<Accepted> {
    use MessageKind::*;
    use SessionState::*;

    let next_state = match (state, kind) {
        (Idle, SupportedAppProtocol) => SessionState::SupportedAppProtocol,
        (SessionState::SupportedAppProtocol, SessionSetup) => SessionState::SessionSetup,
        (SessionSetup, ServiceDiscovery) => SessionState::ServiceDiscovery,

        // ServiceDetail is optional (spec §4.5): ServiceDiscovery may be
        // followed directly by PaymentServiceSelection.
        (SessionState::ServiceDiscovery, ServiceDetail) => SessionState::ServiceDetail,
        (SessionState::ServiceDiscovery, PaymentServiceSelection) => {
            SessionState::PaymentServiceSelection
        }
        (SessionState::ServiceDetail, PaymentServiceSelection) => {
            SessionState::PaymentServiceSelection
        }

        // CertificateInstallation and PaymentDetails are mutually
        // exclusive alternatives (EIM skips both straight to
        // Authorization; PnC takes one or the other depending on
        // whether a fresh contract certificate must first be installed).
        (SessionState::PaymentServiceSelection, CertificateInstallation) => {
            SessionState::CertificateInstallation
        }
        (SessionState::PaymentServiceSelection, PaymentDetails) => SessionState::PaymentDetails,
        (SessionState::PaymentServiceSelection, Authorization) => SessionState::Authorization,
        (SessionState::CertificateInstallation, PaymentDetails) => SessionState::PaymentDetails,
        (SessionState::PaymentDetails, Authorization) => SessionState::Authorization,

        (SessionState::Authorization, ChargeParameterDiscovery) => {
            SessionState::ChargeParameterDiscovery
        }
        (SessionState::ChargeParameterDiscovery, CableCheck) => SessionState::CableCheck,
        (SessionState::CableCheck, PreCharge) => SessionState::PreCharge,
        (SessionState::PreCharge, PowerDelivery) => SessionState::PowerDeliveryStart,

        // Entering the loop: either cadence is valid depending on AC/DC.
        (SessionState::PowerDeliveryStart, CurrentDemand) => SessionState::CurrentDemand,
        (SessionState::PowerDeliveryStart, ChargingStatus) => SessionState::CurrentDemand,

        // The loop itself (spec §4.5 Loops), and the two ways out of it:
        // a further CurrentDemand/ChargingStatus round, or PowerDelivery
        // (Stop) once the controller signals the loop should end.
        (SessionState::CurrentDemand, CurrentDemand) => SessionState::CurrentDemand,
        (SessionState::CurrentDemand, ChargingStatus) => SessionState::CurrentDemand,
        (SessionState::CurrentDemand, PowerDelivery) => SessionState::PowerDeliveryStop,

        // WeldingDetection is optional (DC only); AC sessions go straight
        // to SessionStop.
        (SessionState::PowerDeliveryStop, WeldingDetection) => SessionState::WeldingDetection,
        (SessionState::PowerDeliveryStop, SessionStop) => SessionState::SessionStop,
        (SessionState::WeldingDetection, SessionStop) => SessionState::SessionStop,

        _ => {
            return Err(Error::Protocol(format!(
                "unexpected message kind {kind:?} while in state {state:?}"
            )))
        }
    };

    Ok(Accepted { next_state })
}

/// Override the state [`accept`] returned when the response just accepted
/// carries `EVSENotification=ReNegotiate` (spec §4.5 Renegotiation): the
/// schedule in force remains valid until a new one is installed. Jumping
/// back to `Authorization` -- not `ChargeParameterDiscovery` itself, which
/// names the state *after* a discovery round-trip -- is what makes
/// `build_request` emit a fresh `ChargeParameterDiscoveryReq` on the next
/// iteration instead of skipping straight to `CableCheck`.
pub fn apply_renegotiation(_accepted: Accepted) -> Accepted {
    Accepted { next_state: SessionState::Authorization }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_sequence_is_accepted_in_order() {
        let mut state = SessionState::Idle;
        let sequence = [
            MessageKind::SupportedAppProtocol,
            MessageKind::SessionSetup,
            MessageKind::ServiceDiscovery,
            MessageKind::PaymentServiceSelection,
            MessageKind::Authorization,
            MessageKind::ChargeParameterDiscovery,
            MessageKind::CableCheck,
            MessageKind::PreCharge,
            MessageKind::PowerDelivery,
            MessageKind::CurrentDemand,
            MessageKind::PowerDelivery,
            MessageKind::SessionStop,
        ];
        for kind in sequence {
            state = accept(state, kind).expect("transition should be accepted").next_state;
        }
        assert_eq!(state, SessionState::SessionStop);
    }

    #[test]
    fn out_of_order_message_is_rejected() {
        let err = accept(SessionState::Idle, MessageKind::CurrentDemand);
        assert!(matches!(err, Err(Error::Protocol(_))));
    }

    #[test]
    fn current_demand_loop_self_transitions() {
        let accepted = accept(SessionState::CurrentDemand, MessageKind::CurrentDemand).unwrap();
        assert_eq!(accepted.next_state, SessionState::CurrentDemand);
    }

    #[test]
    fn optional_service_detail_can_be_skipped() {
        let accepted =
            accept(SessionState::ServiceDiscovery, MessageKind::PaymentServiceSelection).unwrap();
        assert_eq!(accepted.next_state, SessionState::PaymentServiceSelection);
    }

    #[test]
    fn renegotiation_overrides_the_accepted_state() {
        let accepted = accept(SessionState::CurrentDemand, MessageKind::CurrentDemand).unwrap();
        let renegotiated = apply_renegotiation(accepted);
        assert_eq!(renegotiated.next_state, SessionState::Authorization);
    }

    #[test]
    fn renegotiated_state_rebuilds_charge_parameter_discovery() {
        let renegotiated =
            apply_renegotiation(accept(SessionState::CurrentDemand, MessageKind::CurrentDemand).unwrap());
        let resumed =
            accept(renegotiated.next_state, MessageKind::ChargeParameterDiscovery).unwrap();
        assert_eq!(resumed.next_state, SessionState::ChargeParameterDiscovery);
    }
}
