// src/scheduler/algorithm.rs
use crate::pool::{Server, ServerPool};
use async_trait::async_trait;
use std::sync::Arc;

pub use crate::config::Algorithm;

/// Scheduling strategy: pick one live server from the pool, or report that
/// none is available. Implementations keep their rotation state in the pool
/// and must tolerate arbitrary concurrent calls.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, pool: &ServerPool) -> Option<Arc<Server>>;

    fn name(&self) -> &'static str;
}
