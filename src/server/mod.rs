//! Control-plane core: configuration, placement, the agent client, the
//! container lifecycle and the liveness sweep.

pub mod agent_client;
pub mod config;
pub mod health_monitor;
pub mod orchestrator;
pub mod placement;
