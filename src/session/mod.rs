//! In-progress form sessions with a fixed time-to-live.

pub mod model;
pub mod store;

pub use model::Session;
pub use store::{MAX_WRITE_ATTEMPTS, SessionStore, spawn_sweep_task};
