//! Message kinds and bodies (spec §3, §4.1). `MessageKind` is the pairing
//! key the router and the timers key off; `Body` is the per-kind typed
//! payload the EXI codec serializes.

use super::energy::{EnergyTransferMode, PaymentMethod, Power};
use super::response_code::ResponseCode;
use super::schedule::ChargingSchedule;
use super::session::SessionId;
use super::Dialect;

/// The kind of a request or its paired response. Shared across both
/// dialects: -20 renames phases but the transition structure (and thus
/// the pairing key) is the same (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    SupportedAppProtocol,
    SessionSetup,
    ServiceDiscovery,
    ServiceDetail,
    PaymentServiceSelection,
    CertificateInstallation,
    PaymentDetails,
    Authorization,
    ChargeParameterDiscovery,
    CableCheck,
    PreCharge,
    PowerDelivery,
    CurrentDemand,
    ChargingStatus,
    WeldingDetection,
    SessionStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// A fully decoded application message: dialect tag, pairing kind, and a
/// typed body (spec §3 "Message").
#[derive(Debug, Clone)]
pub struct Message {
    pub dialect: Dialect,
    pub session_id: Option<SessionId>,
    pub direction: Direction,
    pub kind: MessageKind,
    pub body: Body,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

/// Power-delivery intent carried by `PowerDeliveryReq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDeliveryAction {
    Start,
    Stop,
}

/// `EVSENotification` values the SECC can push (spec §4.5 Renegotiation,
/// §4.5 Loops).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvseNotification {
    None,
    Stop,
    ReNegotiate,
}

/// `ChargingSession` directive carried on `SessionStopReq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingSessionDirective {
    Pause,
    Terminate,
}

/// Every request/response body. One variant per `(kind, direction)` pair
/// that the state machines construct or consume.
#[derive(Debug, Clone)]
pub enum Body {
    SupportedAppProtocolReq { supported_dialects: Vec<Dialect> },
    SupportedAppProtocolRes { selected: Dialect, code: ResponseCode },

    SessionSetupReq { evcc_id: String },
    SessionSetupRes { evse_id: String, code: ResponseCode },

    ServiceDiscoveryReq,
    ServiceDiscoveryRes { offered_modes: Vec<EnergyTransferMode>, code: ResponseCode },

    ServiceDetailReq { service_id: u16 },
    ServiceDetailRes { code: ResponseCode },

    PaymentServiceSelectionReq { payment_method: PaymentMethod, selected_service: u16 },
    PaymentServiceSelectionRes { code: ResponseCode },

    CertificateInstallationReq { contract_certificate_chain: Vec<Vec<u8>> },
    CertificateInstallationRes { contract_certificate_chain: Vec<Vec<u8>>, code: ResponseCode },

    PaymentDetailsReq { contract_certificate_chain: Vec<Vec<u8>> },
    PaymentDetailsRes { challenge: [u8; 16], code: ResponseCode },

    AuthorizationReq { signature: Option<Vec<u8>> },
    AuthorizationRes { authorized: bool, code: ResponseCode },

    ChargeParameterDiscoveryReq { energy_transfer_mode: EnergyTransferMode, max_power: Power },
    ChargeParameterDiscoveryRes { schedule: ChargingSchedule, code: ResponseCode },

    CableCheckReq,
    CableCheckRes { code: ResponseCode },

    PreChargeReq { target_voltage: Power },
    PreChargeRes { present_voltage: Power, code: ResponseCode },

    PowerDeliveryReq { action: PowerDeliveryAction },
    PowerDeliveryRes { code: ResponseCode },

    CurrentDemandReq { target_current: Power },
    CurrentDemandRes {
        present_voltage: Power,
        present_current: Power,
        evse_notification: EvseNotification,
        code: ResponseCode,
    },

    ChargingStatusReq,
    ChargingStatusRes {
        present_power: Power,
        evse_notification: EvseNotification,
        code: ResponseCode,
    },

    WeldingDetectionReq,
    WeldingDetectionRes { code: ResponseCode },

    SessionStopReq { directive: ChargingSessionDirective },
    SessionStopRes { code: ResponseCode },
}

impl Body {
    /// The [`MessageKind`] this body belongs to, recoverable without a
    /// separate tag because the variant enumerates it.
    pub fn kind(&self) -> MessageKind {
        use Body::*;
        match self {
            SupportedAppProtocolReq { .. } | SupportedAppProtocolRes { .. } => {
                MessageKind::SupportedAppProtocol
            }
            SessionSetupReq { .. } | SessionSetupRes { .. } => MessageKind::SessionSetup,
            ServiceDiscoveryReq | ServiceDiscoveryRes { .. } => MessageKind::ServiceDiscovery,
            ServiceDetailReq { .. } | ServiceDetailRes { .. } => MessageKind::ServiceDetail,
            PaymentServiceSelectionReq { .. } | PaymentServiceSelectionRes { .. } => {
                MessageKind::PaymentServiceSelection
            }
            CertificateInstallationReq { .. } | CertificateInstallationRes { .. } => {
                MessageKind::CertificateInstallation
            }
            PaymentDetailsReq { .. } | PaymentDetailsRes { .. } => MessageKind::PaymentDetails,
            AuthorizationReq { .. } | AuthorizationRes { .. } => MessageKind::Authorization,
            ChargeParameterDiscoveryReq { .. } | ChargeParameterDiscoveryRes { .. } => {
                MessageKind::ChargeParameterDiscovery
            }
            CableCheckReq | CableCheckRes { .. } => MessageKind::CableCheck,
            PreChargeReq { .. } | PreChargeRes { .. } => MessageKind::PreCharge,
            PowerDeliveryReq { .. } | PowerDeliveryRes { .. } => MessageKind::PowerDelivery,
            CurrentDemandReq { .. } | CurrentDemandRes { .. } => MessageKind::CurrentDemand,
            ChargingStatusReq | ChargingStatusRes { .. } => MessageKind::ChargingStatus,
            WeldingDetectionReq | WeldingDetectionRes { .. } => MessageKind::WeldingDetection,
            SessionStopReq { .. } | SessionStopRes { .. } => MessageKind::SessionStop,
        }
    }

    /// The response code carried by a response body, if this is one.
    pub fn response_code(&self) -> Option<ResponseCode> {
        use Body::*;
        match self {
            SupportedAppProtocolRes { code, .. }
            | SessionSetupRes { code, .. }
            | ServiceDiscoveryRes { code, .. }
            | ServiceDetailRes { code, .. }
            | PaymentServiceSelectionRes { code, .. }
            | CertificateInstallationRes { code, .. }
            | PaymentDetailsRes { code, .. }
            | AuthorizationRes { code, .. }
            | ChargeParameterDiscoveryRes { code, .. }
            | CableCheckRes { code, .. }
            | PreChargeRes { code, .. }
            | PowerDeliveryRes { code, .. }
            | CurrentDemandRes { code, .. }
            | ChargingStatusRes { code, .. }
            | WeldingDetectionRes { code, .. }
            | SessionStopRes { code, .. } => Some(*code),
            _ => None,
        }
    }
}
