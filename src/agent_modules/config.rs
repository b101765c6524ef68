use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_CONFIG_PATH: &str = "agent_config.toml";

#[derive(Deserialize, Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the control plane, e.g. `http://manager:8000`.
    pub manager_url: String,
    pub host_id: Uuid,
    /// Key issued at host registration; checked on every inbound call and sent on heartbeats.
    pub server_key: String,
    pub listen_address: String,
    pub work_dir: String,
    pub docker_binary: String,
    pub heartbeat_interval_secs: u64,
    pub log_dir: String,
}

#[derive(Deserialize, Default, Debug)]
struct PartialAgentConfig {
    manager_url: Option<String>,
    host_id: Option<Uuid>,
    server_key: Option<String>,
    listen_address: Option<String>,
    work_dir: Option<String>,
    docker_binary: Option<String>,
    heartbeat_interval_secs: Option<u64>,
    log_dir: Option<String>,
}

fn default_listen_address() -> String {
    "0.0.0.0:8003".to_string()
}

fn default_work_dir() -> String {
    "/opt/containers".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl AgentConfig {
    pub fn load(config_path: &str) -> Result<Self, String> {
        dotenv::dotenv().ok();

        let path = Path::new(config_path);
        let file_config: PartialAgentConfig = if path.exists() {
            let contents = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read agent config file '{config_path}': {e}"))?;
            toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse agent config file '{config_path}': {e}"))?
        } else {
            PartialAgentConfig::default()
        };

        let env_config: PartialAgentConfig = envy::from_env::<PartialAgentConfig>()
            .map_err(|e| format!("Failed to load agent config from environment: {e}"))?;

        Self::merge(env_config, file_config)
    }

    fn merge(env: PartialAgentConfig, file: PartialAgentConfig) -> Result<Self, String> {
        let config = AgentConfig {
            manager_url: env.manager_url.or(file.manager_url)
                .ok_or("MANAGER_URL is required")?,
            host_id: env.host_id.or(file.host_id)
                .ok_or("HOST_ID is required")?,
            server_key: env.server_key.or(file.server_key)
                .ok_or("SERVER_KEY is required")?,
            listen_address: env.listen_address.or(file.listen_address)
                .unwrap_or_else(default_listen_address),
            work_dir: env.work_dir.or(file.work_dir)
                .unwrap_or_else(default_work_dir),
            docker_binary: env.docker_binary.or(file.docker_binary)
                .unwrap_or_else(default_docker_binary),
            heartbeat_interval_secs: env.heartbeat_interval_secs.or(file.heartbeat_interval_secs)
                .unwrap_or(10),
            log_dir: env.log_dir.or(file.log_dir)
                .unwrap_or_else(default_log_dir),
        };
        if config.heartbeat_interval_secs == 0 {
            return Err("HEARTBEAT_INTERVAL_SECS must be positive".to_string());
        }
        Ok(config)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_url(&self) -> String {
        format!("{}/hosts/{}/heartbeat", self.manager_url.trim_end_matches('/'), self.host_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_with_defaults() {
        let file: PartialAgentConfig = toml::from_str(
            r#"
            manager_url = "http://manager:8000/"
            host_id = "6f1c2d2e-8a47-4b8e-9a55-0f1f6c7b1d10"
            server_key = "k"
            "#,
        )
        .unwrap();
        let config = AgentConfig::merge(PartialAgentConfig::default(), file).unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:8003");
        assert_eq!(config.work_dir, "/opt/containers");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(
            config.heartbeat_url(),
            "http://manager:8000/hosts/6f1c2d2e-8a47-4b8e-9a55-0f1f6c7b1d10/heartbeat"
        );
    }

    #[test]
    fn required_keys() {
        let env = PartialAgentConfig { manager_url: Some("http://m".into()), ..Default::default() };
        let err = AgentConfig::merge(env, PartialAgentConfig::default()).unwrap_err();
        assert!(err.contains("HOST_ID"));
    }
}
