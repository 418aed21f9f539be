// src/pool/mod.rs
mod pool;
mod server;

pub use pool::{PoolError, ServerPool};
pub use server::Server;
