//! The three-step merchant form: state machine, field rules, and the
//! orchestrator that drives sessions through to a submitted lead.

pub mod model;
pub mod orchestrator;
pub mod state;
pub mod validate;

pub use model::{BusinessInfo, FinancialInfo, FormData, FormFields, PersonalInfo};
pub use orchestrator::{FieldUpdate, FormOrchestrator, StepOutcome};
pub use state::{CompletedSteps, FormStep};
