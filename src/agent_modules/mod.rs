//! Per-host agent: runs compose environments on behalf of the control plane
//! and reports liveness back to it.

pub mod config;
pub mod executor;
pub mod heartbeat;
pub mod metrics;
pub mod routes;
