// src/scheduler/round_robin.rs
use crate::pool::{Server, ServerPool};
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use std::sync::Arc;

/// Cyclic rotation over the registered order, skipping dead servers.
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for RoundRobin {
    async fn schedule(&self, pool: &ServerPool) -> Option<Arc<Server>> {
        let len = pool.len();
        let next = pool.advance();

        // One full cycle starting at the rotation point.
        for i in next..next + len {
            let position = i % len;
            let server = pool.get(position);
            if server.is_alive().await {
                if position != next {
                    // Resume rotation from the server actually selected,
                    // not from the raw increment point.
                    pool.resume_from(position);
                }
                return Some(server.clone());
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
