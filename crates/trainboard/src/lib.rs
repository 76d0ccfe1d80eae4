//! trainboard: job analytics and live training-metric charts.
//!
//! This crate re-exports the core library and exposes the HTTP server as
//! [`server`].

pub use trainboard_core::*;
pub use trainboard_server as server;
