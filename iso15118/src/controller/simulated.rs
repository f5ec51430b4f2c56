//! Deterministic in-tree simulator controllers (spec §14 of
//! `SPEC_FULL.md`): the default and only controller implementation this
//! repository ships, selected by `SECC_CONTROLLER_SIM`/
//! `EVCC_CONTROLLER_SIM`. A real hardware controller is an external
//! collaborator (spec §1) this crate does not provide.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::controller::{
    AuthorizationDecision, AuthorizationPreference, EnergyLimits, EvccController,
    ScheduleRequirements, SeccController,
};
use crate::error::Result;
use crate::message::{ChargingSchedule, EnergyTransferMode, PaymentMethod, Power, ScheduleEntry};

/// Simulated EV: a battery that linearly ramps its SOC while charging and
/// reports a fixed maximum acceptance power.
pub struct SimulatedEvccController {
    id: String,
    soc: Mutex<f64>,
    target_soc: f64,
    max_power: Power,
    preferences: AuthorizationPreference,
}

impl SimulatedEvccController {
    pub fn new(id: impl Into<String>, start_soc: f64, target_soc: f64) -> Self {
        SimulatedEvccController {
            id: id.into(),
            soc: Mutex::new(start_soc),
            target_soc,
            max_power: Power::new(110, -1), // 11.0 (kW or A depending on caller's unit convention)
            preferences: AuthorizationPreference { use_tls: false, payment_method: PaymentMethod::Eim },
        }
    }

    /// Advance the simulated SOC after a `CurrentDemand`/`ChargingStatus`
    /// tick; called by the EVCC loop driver, not by the trait itself.
    pub fn tick(&self) {
        let mut soc = self.soc.lock();
        *soc = (*soc + 0.01).min(1.0);
    }
}

#[async_trait]
impl EvccController for SimulatedEvccController {
    fn evcc_id(&self) -> String {
        self.id.clone()
    }

    fn choose_energy_mode(&self, offered: &[EnergyTransferMode]) -> Result<EnergyTransferMode> {
        offered
            .first()
            .copied()
            .ok_or_else(|| crate::error::Error::Controller("SECC offered no energy transfer modes".into()))
    }

    fn preferences(&self) -> AuthorizationPreference {
        self.preferences
    }

    async fn present_soc(&self) -> Result<f64> {
        Ok(*self.soc.lock())
    }

    async fn target_soc(&self) -> Result<f64> {
        Ok(self.target_soc)
    }

    async fn max_power(&self) -> Result<Power> {
        Ok(self.max_power)
    }

    async fn requested_current(&self, schedule_limit: Power) -> Result<Power> {
        Ok(Power::new(schedule_limit.value.min(self.max_power.value), schedule_limit.multiplier))
    }

    async fn charging_should_stop(&self) -> bool {
        *self.soc.lock() >= self.target_soc
    }

    async fn renegotiation_requested(&self) -> bool {
        false
    }
}

/// Simulated EVSE: fixed tariff/limits, always authorizes, generates a
/// single flat-power schedule window.
pub struct SimulatedSeccController {
    id: String,
    limits: EnergyLimits,
}

impl SimulatedSeccController {
    pub fn new(id: impl Into<String>) -> Self {
        SimulatedSeccController {
            id: id.into(),
            limits: EnergyLimits {
                max_voltage: Power::new(4000, -1),
                max_current: Power::new(320, -1),
            },
        }
    }
}

#[async_trait]
impl SeccController for SimulatedSeccController {
    fn evse_id(&self) -> String {
        self.id.clone()
    }

    fn supported_energy_modes(&self) -> Vec<EnergyTransferMode> {
        vec![EnergyTransferMode::AcThreePhase, EnergyTransferMode::DcCombo]
    }

    async fn is_authorized(&self) -> Result<AuthorizationDecision> {
        Ok(AuthorizationDecision::Accepted)
    }

    async fn present_voltage(&self) -> Result<Power> {
        Ok(self.limits.max_voltage)
    }

    async fn present_current(&self) -> Result<Power> {
        Ok(Power::new(self.limits.max_current.value / 2, self.limits.max_current.multiplier))
    }

    async fn limits(&self) -> Result<EnergyLimits> {
        Ok(self.limits)
    }

    async fn build_schedule(&self, requirements: ScheduleRequirements) -> Result<ChargingSchedule> {
        let cap = requirements
            .requested_max_power
            .value
            .min(requirements.evse_limits.max_current.value);
        Ok(ChargingSchedule::new(vec![ScheduleEntry {
            start_offset: std::time::Duration::from_secs(0),
            duration: std::time::Duration::from_secs(4 * 3600),
            max_power: Power::new(cap, requirements.requested_max_power.multiplier),
        }]))
    }

    async fn should_stop(&self) -> bool {
        false
    }
}
