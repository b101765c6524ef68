use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::vpn::address_pool::AddressPool;
use crate::vpn::bundle::TunnelSettings;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub listen_address: String,

    pub vpn_subnet: String,
    pub openvpn_server_host: String,
    pub openvpn_server_port: u16,
    pub openvpn_proto: String,
    pub openvpn_dev: String,
    pub tunnel_interface: String,

    pub easyrsa_dir: String,
    pub ovpn_dir: String,
    pub ccd_dir: String,

    pub heartbeat_timeout_secs: u64,
    pub log_dir: String,

    pub admin_default_email: Option<String>,
    pub admin_default_password: Option<String>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    database_url: Option<String>,
    jwt_secret: Option<String>,
    listen_address: Option<String>,
    vpn_subnet: Option<String>,
    openvpn_server_host: Option<String>,
    openvpn_server_port: Option<u16>,
    openvpn_proto: Option<String>,
    openvpn_dev: Option<String>,
    tunnel_interface: Option<String>,
    easyrsa_dir: Option<String>,
    ovpn_dir: Option<String>,
    ccd_dir: Option<String>,
    heartbeat_timeout_secs: Option<u64>,
    log_dir: Option<String>,
    admin_default_email: Option<String>,
    admin_default_password: Option<String>,
}

fn default_listen_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_tunnel_interface() -> String {
    "tun0".to_string()
}

fn default_easyrsa_dir() -> String {
    "/etc/openvpn/easy-rsa".to_string()
}

fn default_ovpn_dir() -> String {
    "/etc/openvpn/pki/ovpns".to_string()
}

fn default_ccd_dir() -> String {
    "/etc/openvpn/ccd".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl ServerConfig {
    /// Optional TOML file, overridden field by field by the environment (after `.env`).
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        let file_config: PartialServerConfig = match config_path.map(Path::new) {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            }
            _ => PartialServerConfig::default(),
        };

        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        Self::merge(env_config, file_config)
    }

    fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Result<Self, String> {
        let config = ServerConfig {
            database_url: env.database_url.or(file.database_url)
                .ok_or("DATABASE_URL is required")?,
            jwt_secret: env.jwt_secret.or(file.jwt_secret)
                .ok_or("JWT_SECRET is required")?,
            listen_address: env.listen_address.or(file.listen_address)
                .unwrap_or_else(default_listen_address),
            vpn_subnet: env.vpn_subnet.or(file.vpn_subnet)
                .ok_or("VPN_SUBNET is required")?,
            openvpn_server_host: env.openvpn_server_host.or(file.openvpn_server_host)
                .ok_or("OPENVPN_SERVER_HOST is required")?,
            openvpn_server_port: env.openvpn_server_port.or(file.openvpn_server_port)
                .ok_or("OPENVPN_SERVER_PORT is required")?,
            openvpn_proto: env.openvpn_proto.or(file.openvpn_proto)
                .ok_or("OPENVPN_PROTO is required")?,
            openvpn_dev: env.openvpn_dev.or(file.openvpn_dev)
                .ok_or("OPENVPN_DEV is required")?,
            tunnel_interface: env.tunnel_interface.or(file.tunnel_interface)
                .unwrap_or_else(default_tunnel_interface),
            easyrsa_dir: env.easyrsa_dir.or(file.easyrsa_dir)
                .unwrap_or_else(default_easyrsa_dir),
            ovpn_dir: env.ovpn_dir.or(file.ovpn_dir)
                .unwrap_or_else(default_ovpn_dir),
            ccd_dir: env.ccd_dir.or(file.ccd_dir)
                .unwrap_or_else(default_ccd_dir),
            heartbeat_timeout_secs: env.heartbeat_timeout_secs.or(file.heartbeat_timeout_secs)
                .ok_or("HEARTBEAT_TIMEOUT_SECS is required")?,
            log_dir: env.log_dir.or(file.log_dir)
                .unwrap_or_else(default_log_dir),
            admin_default_email: env.admin_default_email.or(file.admin_default_email),
            admin_default_password: env.admin_default_password.or(file.admin_default_password),
        };

        config.address_pool()?;
        if config.heartbeat_timeout_secs == 0 {
            return Err("HEARTBEAT_TIMEOUT_SECS must be positive".to_string());
        }
        if config.openvpn_server_port == 0 {
            return Err("OPENVPN_SERVER_PORT must be positive".to_string());
        }
        Ok(config)
    }

    pub fn address_pool(&self) -> Result<AddressPool, String> {
        AddressPool::parse(&self.vpn_subnet).map_err(|e| e.to_string())
    }

    pub fn tunnel_settings(&self) -> TunnelSettings {
        TunnelSettings {
            host: self.openvpn_server_host.clone(),
            port: self.openvpn_server_port,
            proto: self.openvpn_proto.clone(),
            dev: self.openvpn_dev.clone(),
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}
