// src/pool/server.rs
use tokio::sync::RwLock;
use url::Url;

/// One upstream endpoint plus its liveness flag. The uid and target are fixed
/// at registration; only the liveness flag mutates afterwards.
#[derive(Debug)]
pub struct Server {
    pub uid: u32,
    pub target: Url,
    alive: RwLock<bool>,
}

impl Server {
    pub fn new(uid: u32, target: Url) -> Self {
        Self {
            uid,
            target,
            alive: RwLock::new(true),
        }
    }

    pub async fn is_alive(&self) -> bool {
        *self.alive.read().await
    }

    pub async fn set_alive(&self, alive: bool) {
        *self.alive.write().await = alive;
    }
}
