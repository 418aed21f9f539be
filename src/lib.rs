// src/lib.rs
pub mod config;
pub mod dispatch;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod scheduler;
pub mod server;
