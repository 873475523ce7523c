//! Shared models, policy, and decision logic for the MCO orchestrator.

pub mod classify;
pub mod decision;
pub mod ids;
pub mod model;
pub mod retry;
pub mod time;

pub use decision::*;
pub use model::*;
pub use time::*;
