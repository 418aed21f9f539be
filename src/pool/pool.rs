// src/pool/pool.rs
use super::server::Server;
use crate::config::ServerConfig;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("server pool is empty")]
    Empty,
}

/// Registry of all configured upstream servers.
///
/// The registered sequence is append-only and fixed before the dispatcher
/// starts serving, so scheduling reads it without locking. The rotation
/// cursor is a single atomic counter; liveness transitions go through the
/// active-set bookkeeping so repeated marks in the same direction are no-ops.
pub struct ServerPool {
    registered: Vec<Arc<Server>>,
    cursor: AtomicU64,
    // uid -> position in `registered`, read-only after construction
    index: HashMap<u32, usize>,
    // uids currently considered alive
    active: Mutex<HashSet<u32>>,
}

impl ServerPool {
    /// Build the pool from startup configuration. Uids are assigned in
    /// registration order. All servers start alive and active; the health
    /// checker corrects that on its first sweep.
    pub fn from_configs(configs: &[ServerConfig]) -> Result<Self, PoolError> {
        if configs.is_empty() {
            return Err(PoolError::Empty);
        }

        let mut registered = Vec::with_capacity(configs.len());
        let mut index = HashMap::with_capacity(configs.len());
        let mut active = HashSet::with_capacity(configs.len());

        for (position, config) in configs.iter().enumerate() {
            let uid = position as u32;
            registered.push(Arc::new(Server::new(uid, config.url.clone())));
            index.insert(uid, position);
            active.insert(uid);
            tracing::info!(uid, url = %config.url, "registered upstream");
        }

        Ok(Self {
            registered,
            cursor: AtomicU64::new(0),
            index,
            active: Mutex::new(active),
        })
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    pub fn get(&self, position: usize) -> &Arc<Server> {
        &self.registered[position]
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.registered
    }

    /// Atomically advance the rotation cursor and reduce it to an index.
    pub fn advance(&self) -> usize {
        let raw = self.cursor.fetch_add(1, Ordering::SeqCst) + 1;
        (raw % self.registered.len() as u64) as usize
    }

    /// Rewind the cursor to the last selected position. Plain store:
    /// last-writer-wins under concurrent scheduling is accepted.
    pub fn resume_from(&self, position: usize) {
        self.cursor.store(position as u64, Ordering::SeqCst);
    }

    /// Mark a server dead. No-op unless the uid was in the active set, so
    /// concurrent failure paths report the transition once.
    pub async fn mark_dead(&self, uid: u32) {
        let mut active = self.active.lock().await;
        if !active.remove(&uid) {
            return;
        }
        drop(active);

        if let Some(&position) = self.index.get(&uid) {
            self.registered[position].set_alive(false).await;
            tracing::warn!(uid, url = %self.registered[position].target, "upstream marked dead");
        }
    }

    /// Mark a server alive again. No-op if the uid is already active.
    pub async fn mark_alive(&self, uid: u32) {
        let mut active = self.active.lock().await;
        if !active.insert(uid) {
            return;
        }
        drop(active);

        if let Some(&position) = self.index.get(&uid) {
            self.registered[position].set_alive(true).await;
            tracing::info!(uid, url = %self.registered[position].target, "upstream marked alive");
        }
    }

    /// Number of servers currently in the active set.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
