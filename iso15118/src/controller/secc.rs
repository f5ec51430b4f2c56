//! SECC-side controller capability set (spec §4.8).

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{ChargingSchedule, EnergyTransferMode, Power};

/// Outcome of consulting the authorization oracle (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Accepted,
    Ongoing,
    Rejected,
}

/// Present energy limits the SECC can offer, from the physical EVSE
/// source (spec §4.8 "energy oracle").
#[derive(Debug, Clone, Copy)]
pub struct EnergyLimits {
    pub max_voltage: Power,
    pub max_current: Power,
}

/// Inputs to the schedule generator: what the EVCC asked for in
/// `ChargeParameterDiscoveryReq` plus the EVSE's own limits.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleRequirements {
    pub energy_transfer_mode: EnergyTransferMode,
    pub requested_max_power: Power,
    pub evse_limits: EnergyLimits,
}

/// Everything the SECC state machine (spec §4.6) consults the physical
/// world through.
#[async_trait]
pub trait SeccController: Send + Sync {
    /// Stable EVSE identity string sent in `SessionSetupRes`.
    fn evse_id(&self) -> String;

    /// The energy transfer modes this EVSE can offer in `ServiceDiscoveryRes`.
    fn supported_energy_modes(&self) -> Vec<EnergyTransferMode>;

    /// Authorization oracle: `EIM` consults an external HMI/RFID result,
    /// `PnC` is decided independently by chain/signature/revocation
    /// validation in [`crate::security`] before this is ever called
    /// (spec §4.6).
    async fn is_authorized(&self) -> Result<AuthorizationDecision>;

    /// Present terminal voltage, read from the EVSE's power electronics.
    async fn present_voltage(&self) -> Result<Power>;

    /// Present output current.
    async fn present_current(&self) -> Result<Power>;

    /// Present instantaneous limits (used for `ChargeParameterDiscoveryRes`
    /// and to clamp `CurrentDemandReq`).
    async fn limits(&self) -> Result<EnergyLimits>;

    /// Produce the schedule to offer for `requirements` (spec §4.8
    /// "schedule generator").
    async fn build_schedule(&self, requirements: ScheduleRequirements) -> Result<ChargingSchedule>;

    /// `true` once the EVSE wants the charging loop to end (tariff cap,
    /// operator stop, fault) -- surfaced to the EVCC as
    /// `EVSENotification=Stop` (spec §4.5 Loops).
    async fn should_stop(&self) -> bool;

    /// `true` when the EVSE wants to renegotiate the schedule mid-loop
    /// (new tariff, updated limits) -- surfaced to the EVCC as
    /// `EVSENotification=ReNegotiate` (spec §4.5 Renegotiation). Checked
    /// only while `should_stop` is false; a controller that raises both in
    /// the same tick has `should_stop` win.
    async fn should_renegotiate(&self) -> bool {
        false
    }
}
