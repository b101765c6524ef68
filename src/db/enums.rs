use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "host_status")]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[sea_orm(string_value = "healthy")]
    Healthy,
    #[sea_orm(string_value = "offline")]
    Offline,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "container_status")]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "stopped")]
    Stopped,
    #[sea_orm(string_value = "error")]
    Error,
}

impl ContainerStatus {
    /// `pending -> running -> {stopped, error}`; restart keeps a running container running.
    /// Stopped and errored containers only leave the table by deletion.
    pub fn can_transition_to(self, next: ContainerStatus) -> bool {
        use ContainerStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Error) | (Running, Running) | (Running, Stopped) | (Running, Error)
        )
    }

    /// Maps the runtime's container state (`docker ps` State column) onto a lifecycle status.
    pub fn from_runtime_state(state: &str) -> Option<ContainerStatus> {
        match state.to_ascii_lowercase().as_str() {
            "running" | "restarting" => Some(ContainerStatus::Running),
            "created" => Some(ContainerStatus::Pending),
            "exited" | "paused" | "removing" => Some(ContainerStatus::Stopped),
            "dead" => Some(ContainerStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "api_key_owner")]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyOwner {
    #[sea_orm(string_value = "admin")]
    Admin,
    #[sea_orm(string_value = "server")]
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "user_role")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[sea_orm(string_value = "admin")]
    Admin,
    #[sea_orm(string_value = "user")]
    User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use ContainerStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Error));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Error.can_transition_to(Running));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn runtime_state_mapping() {
        assert_eq!(ContainerStatus::from_runtime_state("running"), Some(ContainerStatus::Running));
        assert_eq!(ContainerStatus::from_runtime_state("Exited"), Some(ContainerStatus::Stopped));
        assert_eq!(ContainerStatus::from_runtime_state("dead"), Some(ContainerStatus::Error));
        assert_eq!(ContainerStatus::from_runtime_state("weird"), None);
    }
}
