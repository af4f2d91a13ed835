//! Simulated subscription session.

mod simulator;
mod stats;

pub use simulator::{RunningSession, Session, SessionConfig};
pub use stats::SessionStats;
