// src/dispatch/mod.rs
mod dispatcher;
mod forwarder;

pub use dispatcher::{AttemptState, DispatchError, Dispatcher, RetryPolicy};
pub use forwarder::{ForwardError, Forwarder, HttpForwarder};
