// src/health/mod.rs
mod checker;
mod probe;

pub use checker::HealthChecker;
pub use probe::{Probe, TcpProbe};
