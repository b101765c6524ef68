use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::agent_protocol::HeartbeatRequest;
use crate::db::entities::host;
use crate::db::services::host_service::{HostSpec, HostUpdate};
use crate::web::error::AppError;

#[derive(Debug, Clone)]
pub struct AuthenticatedAdmin {
    pub id: Uuid,
    pub email: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub admin_key: String,
}

fn default_ssh_port() -> i32 {
    22
}

fn default_api_port() -> i32 {
    8003
}

#[derive(Deserialize)]
pub struct CreateHostRequest {
    pub hostname: String,
    pub ip: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: i32,
    #[serde(default = "default_api_port")]
    pub api_port: i32,
    pub max_containers: i32,
}

#[derive(Deserialize, Default)]
pub struct UpdateHostRequest {
    pub hostname: Option<String>,
    pub ip: Option<String>,
    pub ssh_port: Option<i32>,
    pub api_port: Option<i32>,
    pub max_containers: Option<i32>,
}

#[derive(Serialize)]
pub struct RegisteredHostResponse {
    #[serde(flatten)]
    pub host: host::Model,
    /// Shown once; the agent on this host must be configured with it.
    pub server_key: String,
}

#[derive(Deserialize)]
pub struct LaunchQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateVpnRequest {
    pub client_name: String,
}

fn check_hostname(hostname: &str) -> Result<(), AppError> {
    if hostname.trim().is_empty() {
        return Err(AppError::InvalidInput("hostname must not be empty".to_string()));
    }
    Ok(())
}

fn check_ip(ip: &str) -> Result<(), AppError> {
    ip.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| AppError::InvalidInput(format!("'{ip}' is not an IP address")))
}

fn check_port(field: &str, port: i32) -> Result<(), AppError> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("{field} must be between 1 and 65535")))
    }
}

fn check_capacity(max_containers: i32) -> Result<(), AppError> {
    if max_containers > 0 {
        Ok(())
    } else {
        Err(AppError::InvalidInput("max_containers must be positive".to_string()))
    }
}

impl CreateHostRequest {
    pub fn validate(self) -> Result<HostSpec, AppError> {
        check_hostname(&self.hostname)?;
        check_ip(&self.ip)?;
        check_port("ssh_port", self.ssh_port)?;
        check_port("api_port", self.api_port)?;
        check_capacity(self.max_containers)?;
        Ok(HostSpec {
            hostname: self.hostname,
            ip: self.ip,
            ssh_port: self.ssh_port,
            api_port: self.api_port,
            max_containers: self.max_containers,
        })
    }
}

impl UpdateHostRequest {
    pub fn validate(self) -> Result<HostUpdate, AppError> {
        if let Some(hostname) = &self.hostname { check_hostname(hostname)?; }
        if let Some(ip) = &self.ip { check_ip(ip)?; }
        if let Some(port) = self.ssh_port { check_port("ssh_port", port)?; }
        if let Some(port) = self.api_port { check_port("api_port", port)?; }
        if let Some(max) = self.max_containers { check_capacity(max)?; }
        Ok(HostUpdate {
            hostname: self.hostname,
            ip: self.ip,
            ssh_port: self.ssh_port,
            api_port: self.api_port,
            max_containers: self.max_containers,
        })
    }
}

pub fn validate_heartbeat(report: &HeartbeatRequest) -> Result<(), AppError> {
    if !(0..=100).contains(&report.cpu) || !(0..=100).contains(&report.mem) {
        return Err(AppError::InvalidInput("cpu and mem must be percentages".to_string()));
    }
    if report.containers < 0 {
        return Err(AppError::InvalidInput("containers must not be negative".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(ip: &str, api_port: i32, max: i32) -> CreateHostRequest {
        CreateHostRequest { hostname: "h".into(), ip: ip.into(), ssh_port: 22, api_port, max_containers: max }
    }

    #[test]
    fn host_boundary_validation() {
        assert!(create("192.0.2.1", 8003, 4).validate().is_ok());
        assert!(create("not-an-ip", 8003, 4).validate().is_err());
        assert!(create("192.0.2.1", 0, 4).validate().is_err());
        assert!(create("192.0.2.1", 70000, 4).validate().is_err());
        assert!(create("192.0.2.1", 8003, 0).validate().is_err());

        let partial = UpdateHostRequest { max_containers: Some(-1), ..Default::default() };
        assert!(partial.validate().is_err());
    }

    #[test]
    fn create_request_defaults_ports() {
        let req: CreateHostRequest =
            serde_json::from_str(r#"{"hostname":"h","ip":"192.0.2.1","max_containers":3}"#).unwrap();
        assert_eq!(req.ssh_port, 22);
        assert_eq!(req.api_port, 8003);
    }

    #[test]
    fn heartbeat_ranges() {
        assert!(validate_heartbeat(&HeartbeatRequest { cpu: 100, mem: 0, containers: 0 }).is_ok());
        assert!(validate_heartbeat(&HeartbeatRequest { cpu: 101, mem: 0, containers: 0 }).is_err());
        assert!(validate_heartbeat(&HeartbeatRequest { cpu: 1, mem: 1, containers: -1 }).is_err());
    }
}
