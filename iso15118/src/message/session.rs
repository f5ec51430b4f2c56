//! Session (spec §3): the unit of work, created at connection accept and
//! mutated only by its owning state machine.

use std::time::Instant;

use super::{ChargingSchedule, Dialect, EnergyTransferMode, PaymentMethod};

/// Server-assigned 8-byte session identifier, echoed on every subsequent
/// frame in both directions for the life of the session (spec §3, Invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub [u8; 8]);

impl SessionId {
    pub fn as_bytes(&self) -> [u8; 8] {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Abridged -2 state names (spec §4.5); -20 is analogous with renamed
/// phases and reuses the same enum, since the transition structure is
/// identical across dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
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
    PowerDeliveryStart,
    CurrentDemand,
    PowerDeliveryStop,
    WeldingDetection,
    SessionStop,
    Terminated(TerminationReason),
}

/// Why a session reached `Terminated` -- surfaced in the structured
/// diagnostic and in end-to-end scenario assertions (spec §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    Ok,
    Timeout,
    Protocol,
    Security,
    Transport,
    Controller,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// The unit of work (spec §3). Owns every other per-session object; owned
/// in turn by exactly one task (spec §5) -- no cross-session mutable state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Option<SessionId>,
    pub role: Role,
    pub dialect: Dialect,
    pub energy_transfer_mode: Option<EnergyTransferMode>,
    pub payment_method: Option<PaymentMethod>,
    pub schedule: Option<ChargingSchedule>,
    pub tls: bool,
    pub started_at: Instant,
    pub state: SessionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Evcc,
    Secc,
}

impl Session {
    pub fn new(role: Role, dialect: Dialect, tls: bool) -> Self {
        Session {
            id: None,
            role,
            dialect,
            energy_transfer_mode: None,
            payment_method: None,
            schedule: None,
            tls,
            started_at: Instant::now(),
            state: SessionState::Idle,
        }
    }

    /// Assign the session identifier. Only the SECC does this, and only
    /// once, on its first response (spec §4.6).
    pub fn assign_id(&mut self, id: SessionId) {
        debug_assert!(self.id.is_none(), "session id must be assigned exactly once");
        self.id = Some(id);
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
