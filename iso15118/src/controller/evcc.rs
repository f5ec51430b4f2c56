//! EVCC-side controller capability set (spec §4.8).

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{EnergyTransferMode, PaymentMethod, Power};

/// Session-level preferences the EVCC asks its controller for once, near
/// the start of the session.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationPreference {
    pub use_tls: bool,
    pub payment_method: PaymentMethod,
}

/// Everything the EVCC state machine (spec §4.5) consults the physical
/// world through, rather than knowing how the EV's battery or HMI work.
#[async_trait]
pub trait EvccController: Send + Sync {
    /// Stable EVCC identity string sent in `SessionSetupReq`.
    fn evcc_id(&self) -> String;

    /// The energy transfer mode to request, chosen from the set the SECC
    /// offered in `ServiceDiscoveryRes`.
    fn choose_energy_mode(&self, offered: &[EnergyTransferMode]) -> Result<EnergyTransferMode>;

    /// TLS/authorization preferences for this session.
    fn preferences(&self) -> AuthorizationPreference;

    /// Present state of charge, as a fraction in `[0.0, 1.0]`.
    async fn present_soc(&self) -> Result<f64>;

    /// Target state of charge the driver has requested.
    async fn target_soc(&self) -> Result<f64>;

    /// Maximum power the vehicle's inlet/battery can accept right now.
    async fn max_power(&self) -> Result<Power>;

    /// The current to request on the next `CurrentDemandReq`, given the
    /// schedule limit currently in force.
    async fn requested_current(&self, schedule_limit: Power) -> Result<Power>;

    /// `true` once the driver or the BMS wants the charging loop to end
    /// (spec §4.5 Loops: "SOC target, user stop").
    async fn charging_should_stop(&self) -> bool;

    /// `true` if the controller independently wants the EVCC to request a
    /// renegotiation (rare; most renegotiation is SECC-initiated per
    /// `EVSENotification=ReNegotiate`, spec §4.5 Renegotiation).
    async fn renegotiation_requested(&self) -> bool;
}
