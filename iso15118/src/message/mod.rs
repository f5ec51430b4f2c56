//! The data model (spec §3): messages, dialects, sessions, schedules.
//!
//! A [`Message`] is the sum of every request/response type defined by the
//! two dialects. Each carries a [`Dialect`] tag (fixed for the session), a
//! [`MessageKind`] tag, and a typed body. Requests and responses of the same
//! kind are paired by the router (spec §4.4).

mod energy;
mod kind;
mod response_code;
mod schedule;
mod session;

pub use energy::{EnergyTransferMode, PaymentMethod, Power};
pub use kind::{
    Body, ChargingSessionDirective, Direction, EvseNotification, Message, MessageKind,
    PowerDeliveryAction,
};
pub use response_code::ResponseCode;
pub use schedule::{ChargingSchedule, ScheduleEntry};
pub use session::{Role, Session, SessionId, SessionState, TerminationReason};

/// One of the two mutually exclusive application dialects (spec §3).
/// Selected at `SupportedAppProtocol` negotiation and fixed for the
/// remainder of the session; determines schema, EXI grammar table, and
/// allowed state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// ISO 15118-2 (legacy).
    Di2,
    /// ISO 15118-20 (current).
    Di20,
}

impl Dialect {
    /// V2GTP payload-type tag for EXI bodies of this dialect (spec §6).
    pub const fn payload_type(self) -> u16 {
        match self {
            Dialect::Di2 => 0x8101,
            Dialect::Di20 => 0x8102,
        }
    }

    pub const fn from_payload_type(tag: u16) -> Option<Self> {
        match tag {
            0x8101 => Some(Dialect::Di2),
            0x8102 => Some(Dialect::Di20),
            _ => None,
        }
    }
}

/// Named deadline owned by a session (spec §3, §5). Cancelled on the
/// paired message's arrival; on expiry it transitions the session to
/// `Terminated(Timeout)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Bounds the wait for a single request/response round trip.
    SequenceTimeout,
    /// Bounds the overall idle time between charging-loop messages.
    OngoingTimeout,
    /// Bounds the wait on a performance-critical exchange (`CurrentDemand`).
    PerformanceTimeout,
}
