// src/scheduler/mod.rs
mod algorithm;
mod round_robin;

pub use algorithm::{Algorithm, Scheduler};
pub use round_robin::RoundRobin;

use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduling algorithm {0:?} is not implemented")]
    Unimplemented(Algorithm),
}

/// Build the scheduler selected at startup. The weighted variants are
/// accepted by the config parser but rejected here until implemented.
pub fn create_scheduler(algorithm: Algorithm) -> Result<Arc<dyn Scheduler>, SchedulerError> {
    match algorithm {
        Algorithm::RoundRobin => Ok(Arc::new(RoundRobin::new())),
        other => Err(SchedulerError::Unimplemented(other)),
    }
}
