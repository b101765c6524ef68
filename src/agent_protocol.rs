//! JSON bodies exchanged between the control plane and the per-host agent.

use serde::{Deserialize, Serialize};

/// Header carrying the per-host shared secret on every agent call and heartbeat.
pub const SERVER_KEY_HEADER: &str = "X-Server-Key";

/// One entry of `GET /agent/containers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveContainer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ports: Vec<String>,
}

/// Body of `POST /agent/containers`. Both payloads are standard base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub name: String,
    pub environment_bundle: String,
    pub vpn_credential: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub uptime_seconds: u64,
    pub running_containers: usize,
    pub mem_percent: f32,
    pub cpu_percent: f32,
}

/// Body of `POST /hosts/{id}/heartbeat`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub cpu: i32,
    pub mem: i32,
    pub containers: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub ack: bool,
}

/// Error body returned by agent routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentErrorBody {
    pub error: String,
}

/// Names double as directory names and compose project names on the host,
/// and as file names and subprocess arguments on the control plane.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
