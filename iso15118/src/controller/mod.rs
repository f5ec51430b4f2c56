//! Controller API (spec §4.8): the abstract interfaces the state machines
//! call into to read/mutate the physical-world context, without knowing
//! its implementation. Concrete physical controllers are an external
//! collaborator this repo does not provide (spec §1); [`simulated`] ships
//! the minimal deterministic default the `*_CONTROLLER_SIM` config flags
//! select, and the CLIs' only controller today.
//!
//! All calls are synchronous from the state machine's viewpoint (spec
//! §4.8): the trait methods are `async fn` so an implementation may defer
//! internally (I/O to a real BMS, a tariff service, ...), but must resolve
//! before the step's timer fires.

mod evcc;
mod secc;
pub mod simulated;

pub use evcc::{AuthorizationPreference, EvccController};
pub use secc::{AuthorizationDecision, EnergyLimits, ScheduleRequirements, SeccController};
