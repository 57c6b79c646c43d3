//! Lead form service: multi-step merchant intake with session state,
//! simulated business verification and lead persistence.

pub mod api;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod form;
pub mod lead;
pub mod session;
pub mod store;
pub mod telemetry;
