use std::net::Ipv4Addr;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, EntityTrait, TransactionTrait};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent_protocol::{AgentHealth, LaunchRequest, LiveContainer};
use crate::db::entities::{container, host};
use crate::db::enums::ContainerStatus;
use crate::db::services::{container_service, host_service};
use crate::error::FleetError;
use crate::server::agent_client::{AgentApi, AgentEndpoint, DeleteOutcome};
use crate::server::placement;
use crate::vpn;
use crate::vpn::allocator::{IdentityAllocator, IdentityBundle};
use crate::vpn::firewall::IsolationRules;

#[derive(Debug, Clone, Serialize)]
pub struct LaunchedContainer {
    pub id: Uuid,
    pub host_id: Uuid,
}

/// A container row merged with what its host currently reports.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerDetails {
    pub id: Uuid,
    pub host_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub runtime_state: String,
    pub ports: Vec<String>,
    pub ip_address: Option<Ipv4Addr>,
}

/// Compose names its containers `<project>-<service>-<n>` (or with `_` on v1).
pub fn matches_live_name(container_name: &str, live_name: &str) -> bool {
    live_name == container_name
        || live_name
            .strip_prefix(container_name)
            .is_some_and(|rest| rest.starts_with('-') || rest.starts_with('_'))
}

/// Ties a container row to the live environment on its host and to the
/// overlay identities and rules that connect it to its owner.
pub struct ContainerOrchestrator {
    db: DatabaseConnection,
    identities: Arc<IdentityAllocator>,
    rules: Arc<dyn IsolationRules>,
    agent: Arc<dyn AgentApi>,
}

impl ContainerOrchestrator {
    pub fn new(
        db: DatabaseConnection,
        identities: Arc<IdentityAllocator>,
        rules: Arc<dyn IsolationRules>,
        agent: Arc<dyn AgentApi>,
    ) -> Self {
        Self { db, identities, rules, agent }
    }

    async fn load(&self, container_id: Uuid) -> Result<(container::Model, host::Model), FleetError> {
        let container = container_service::find_container(&self.db, container_id)
            .await?
            .ok_or_else(|| FleetError::not_found(format!("container {container_id}")))?;
        let host = host::Entity::find_by_id(container.host_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| FleetError::not_found(format!("host {} of container {container_id}", container.host_id)))?;
        Ok((container, host))
    }

    /// Places a compose bundle for `user_id` and connects it to the user's identity.
    pub async fn launch(&self, user_id: Uuid, bundle: &[u8]) -> Result<LaunchedContainer, FleetError> {
        if bundle.is_empty() {
            return Err(FleetError::InvalidInput("environment bundle is empty".to_string()));
        }
        let host = placement::select_host(&self.db).await?;
        let endpoint = AgentEndpoint::for_host(&host)?;

        let user_identity = self.identities.ensure_identity(&user_id.to_string()).await?;
        let container_id = Uuid::new_v4();
        let name = container_id.to_string();
        let container_identity = self.identities.ensure_identity(&name).await?;

        if let Err(e) = self.send_launch(&endpoint, &name, bundle, &container_identity).await {
            warn!(container_id = %container_id, host_id = %host.id, error = %e, "Launch failed, revoking container identity.");
            if let Err(revoke_err) = self.identities.revoke(&name).await {
                error!(container_id = %container_id, error = %revoke_err, "Failed to revoke orphaned identity.");
            }
            return Err(e);
        }

        let txn = self.db.begin().await?;
        container_service::insert_container(&txn, container_id, user_id, host.id, ContainerStatus::Running, Utc::now())
            .await?;
        host_service::increment_containers(&txn, host.id).await?;
        txn.commit().await?;

        self.rules.allow(user_identity.address, container_identity.address).await?;

        info!(
            container_id = %container_id,
            host_id = %host.id,
            user_ip = %user_identity.address,
            container_ip = %container_identity.address,
            "Container launched."
        );
        Ok(LaunchedContainer { id: container_id, host_id: host.id })
    }

    async fn send_launch(
        &self,
        endpoint: &AgentEndpoint,
        name: &str,
        bundle: &[u8],
        identity: &IdentityBundle,
    ) -> Result<(), FleetError> {
        let credential = tokio::fs::read(&identity.config_path).await?;
        let request = LaunchRequest {
            name: name.to_string(),
            environment_bundle: STANDARD.encode(bundle),
            vpn_credential: STANDARD.encode(credential),
        };
        self.agent.launch(endpoint, &request).await.map(|_| ())
    }

    pub async fn restart(&self, container_id: Uuid) -> Result<container::Model, FleetError> {
        let (container, host) = self.load(container_id).await?;
        if container.status != ContainerStatus::Running {
            return Err(FleetError::InvalidState(format!(
                "container {container_id} is {}, only running containers restart",
                container.status
            )));
        }

        let endpoint = AgentEndpoint::for_host(&host)?;
        self.agent.restart(&endpoint, &container.name).await?;
        container_service::set_status(&self.db, container_id, ContainerStatus::Running).await?;

        info!(container_id = %container_id, host_id = %host.id, "Container restarted.");
        Ok(container::Model { status: ContainerStatus::Running, ..container })
    }

    /// Tears the environment down remotely, then removes its rules, identity and row.
    pub async fn stop(&self, container_id: Uuid) -> Result<(), FleetError> {
        let (container, host) = self.load(container_id).await?;
        let endpoint = AgentEndpoint::for_host(&host)?;

        if self.agent.delete(&endpoint, &container.name).await? == DeleteOutcome::AlreadyGone {
            warn!(container_id = %container_id, host_id = %host.id, "Environment was already gone on the host.");
        }

        if let Some(identity) = self.identities.active_identity(&container.name).await? {
            self.rules.revoke(identity.address).await?;
        }
        self.identities.revoke(&container.name).await?;

        let txn = self.db.begin().await?;
        container_service::delete_container(&txn, container_id).await?;
        host_service::decrement_containers(&txn, host.id).await?;
        txn.commit().await?;

        info!(container_id = %container_id, host_id = %host.id, "Container stopped and removed.");
        Ok(())
    }

    /// Merges the row with the host's live view. A legal status change reported by
    /// the runtime is written back.
    pub async fn inspect(&self, container_id: Uuid) -> Result<ContainerDetails, FleetError> {
        let (container, host) = self.load(container_id).await?;
        let endpoint = AgentEndpoint::for_host(&host)?;

        let live: LiveContainer = self
            .agent
            .list(&endpoint)
            .await?
            .into_iter()
            .find(|c| matches_live_name(&container.name, &c.name))
            .ok_or_else(|| FleetError::not_found(format!("container {container_id} is not running on its host")))?;

        let mut status = container.status;
        if let Some(observed) = ContainerStatus::from_runtime_state(&live.status) {
            if observed != status && status.can_transition_to(observed) {
                container_service::set_status(&self.db, container_id, observed).await?;
                info!(container_id = %container_id, from = %status, to = %observed, "Container status updated from host.");
                status = observed;
            }
        }

        let ip_address = self
            .identities
            .active_identity(&container.name)
            .await?
            .map(|identity| identity.address);

        Ok(ContainerDetails {
            id: container.id,
            host_id: container.host_id,
            user_id: container.user_id,
            created_at: container.created_at,
            name: live.name,
            image: live.image,
            status,
            runtime_state: live.status,
            ports: live.ports,
            ip_address,
        })
    }

    pub async fn list(&self) -> Result<Vec<container::Model>, FleetError> {
        Ok(container_service::list_containers(&self.db).await?)
    }

    /// Retires the overlay identity and rules of every container on the host, then
    /// deregisters it. Environments still running remotely are not torn down.
    pub async fn deregister_host(&self, host_id: Uuid) -> Result<(), FleetError> {
        host_service::get_host(&self.db, host_id).await?;
        let containers = container_service::list_containers_on_host(&self.db, host_id).await?;
        for container in &containers {
            vpn::retire_identity(&self.identities, self.rules.as_ref(), &container.name).await?;
        }
        host_service::deregister_host(&self.db, host_id).await?;

        if !containers.is_empty() {
            warn!(host_id = %host_id, containers = containers.len(), "Host deregistered with containers, their identities were retired.");
        }
        Ok(())
    }

    /// Asks a host's agent for its own view of load and uptime.
    pub async fn probe_host(&self, host_id: Uuid) -> Result<AgentHealth, FleetError> {
        let host = host_service::get_host(&self.db, host_id).await?;
        let endpoint = AgentEndpoint::for_host(&host)?;
        self.agent.health(&endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::services::vpn_profile_service;
    use crate::test_support::{healthy_host, TestFleet};
    use crate::vpn::firewall::rule_references;

    #[test]
    fn compose_derived_names_match() {
        let n = "6f1c2d2e";
        assert!(matches_live_name(n, n));
        assert!(matches_live_name(n, "6f1c2d2e-web-1"));
        assert!(matches_live_name(n, "6f1c2d2e_web_1"));
        assert!(!matches_live_name(n, "6f1c2d2e0-web-1"));
        assert!(!matches_live_name(n, "x6f1c2d2e"));
    }

    #[tokio::test]
    async fn launch_then_stop_leaves_nothing_behind() {
        let fleet = TestFleet::new().await;
        let host = healthy_host(&fleet.db, "a", 2).await;
        let user = Uuid::new_v4();

        let launched = fleet.orchestrator.launch(user, b"PK-zip").await.unwrap();
        assert_eq!(launched.host_id, host.id);
        assert_eq!(host_service::get_host(&fleet.db, host.id).await.unwrap().current_containers, 1);

        let sent = fleet.agent.launches();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name, launched.id.to_string());
        assert_eq!(STANDARD.decode(&sent[0].environment_bundle).unwrap(), b"PK-zip");

        let user_ip: Ipv4Addr = "10.8.0.2".parse().unwrap();
        let container_ip: Ipv4Addr = "10.8.0.3".parse().unwrap();
        let rules = fleet.table.rules();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| rule_references(r, "tun0", user_ip) && rule_references(r, "tun0", container_ip)));

        fleet.orchestrator.stop(launched.id).await.unwrap();

        assert!(container_service::find_container(&fleet.db, launched.id).await.unwrap().is_none());
        assert_eq!(host_service::get_host(&fleet.db, host.id).await.unwrap().current_containers, 0);
        assert!(fleet.table.rules().is_empty());
        assert!(vpn_profile_service::active_profile(&fleet.db, &launched.id.to_string()).await.unwrap().is_none());
        assert!(vpn_profile_service::active_profile(&fleet.db, &user.to_string()).await.unwrap().is_some());
        assert!(matches!(fleet.orchestrator.inspect(launched.id).await, Err(FleetError::NotFound(_))));
        assert!(matches!(fleet.orchestrator.stop(launched.id).await, Err(FleetError::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_launch_persists_nothing() {
        let fleet = TestFleet::new().await;
        let host = healthy_host(&fleet.db, "a", 2).await;
        fleet.agent.fail_launches();

        let err = fleet.orchestrator.launch(Uuid::new_v4(), b"PK-zip").await.unwrap_err();

        assert!(matches!(err, FleetError::RemoteFailure(_)));
        assert!(fleet.orchestrator.list().await.unwrap().is_empty());
        assert_eq!(host_service::get_host(&fleet.db, host.id).await.unwrap().current_containers, 0);
        assert!(fleet.table.rules().is_empty());
        // Only the user identity survives.
        assert_eq!(vpn_profile_service::active_addresses(&fleet.db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn launch_without_capacity_fails_before_any_identity() {
        let fleet = TestFleet::new().await;
        assert!(matches!(
            fleet.orchestrator.launch(Uuid::new_v4(), b"PK").await,
            Err(FleetError::CapacityExhausted(_))
        ));
        assert!(vpn_profile_service::active_addresses(&fleet.db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_tolerates_environment_already_gone() {
        let fleet = TestFleet::new().await;
        healthy_host(&fleet.db, "a", 2).await;
        let launched = fleet.orchestrator.launch(Uuid::new_v4(), b"PK").await.unwrap();
        fleet.agent.forget_environments();

        fleet.orchestrator.stop(launched.id).await.unwrap();
        assert!(fleet.orchestrator.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restart_requires_running_and_known_environment() {
        let fleet = TestFleet::new().await;
        healthy_host(&fleet.db, "a", 2).await;
        let launched = fleet.orchestrator.launch(Uuid::new_v4(), b"PK").await.unwrap();

        let restarted = fleet.orchestrator.restart(launched.id).await.unwrap();
        assert_eq!(restarted.status, ContainerStatus::Running);

        container_service::set_status(&fleet.db, launched.id, ContainerStatus::Stopped).await.unwrap();
        assert!(matches!(fleet.orchestrator.restart(launched.id).await, Err(FleetError::InvalidState(_))));

        container_service::set_status(&fleet.db, launched.id, ContainerStatus::Running).await.unwrap();
        fleet.agent.forget_environments();
        assert!(matches!(fleet.orchestrator.restart(launched.id).await, Err(FleetError::NotFound(_))));
        assert!(matches!(fleet.orchestrator.restart(Uuid::new_v4()).await, Err(FleetError::NotFound(_))));
    }

    #[tokio::test]
    async fn inspect_merges_live_state() {
        let fleet = TestFleet::new().await;
        healthy_host(&fleet.db, "a", 2).await;
        let launched = fleet.orchestrator.launch(Uuid::new_v4(), b"PK").await.unwrap();
        let name = launched.id.to_string();

        fleet.agent.set_live(vec![LiveContainer {
            id: "abc".into(),
            name: format!("{name}-web-1"),
            image: "nginx:latest".into(),
            status: "running".into(),
            ports: vec!["80/tcp".into()],
        }]);
        let details = fleet.orchestrator.inspect(launched.id).await.unwrap();
        assert_eq!(details.status, ContainerStatus::Running);
        assert_eq!(details.image, "nginx:latest");
        assert_eq!(details.ip_address, Some("10.8.0.3".parse().unwrap()));

        fleet.agent.set_live(vec![LiveContainer {
            id: "abc".into(),
            name: format!("{name}-web-1"),
            image: "nginx:latest".into(),
            status: "exited".into(),
            ports: vec![],
        }]);
        let details = fleet.orchestrator.inspect(launched.id).await.unwrap();
        assert_eq!(details.status, ContainerStatus::Stopped);
        let row = container_service::find_container(&fleet.db, launched.id).await.unwrap().unwrap();
        assert_eq!(row.status, ContainerStatus::Stopped);

        fleet.agent.set_live(vec![]);
        assert!(matches!(fleet.orchestrator.inspect(launched.id).await, Err(FleetError::NotFound(_))));
    }

    #[tokio::test]
    async fn deregistering_a_host_retires_its_containers() {
        let fleet = TestFleet::new().await;
        let host = healthy_host(&fleet.db, "a", 2).await;
        let user = Uuid::new_v4();
        let launched = fleet.orchestrator.launch(user, b"PK").await.unwrap();
        assert_eq!(fleet.table.rules().len(), 2);

        fleet.orchestrator.deregister_host(host.id).await.unwrap();

        assert!(container_service::find_container(&fleet.db, launched.id).await.unwrap().is_none());
        assert!(fleet.table.rules().is_empty());
        assert!(vpn_profile_service::active_profile(&fleet.db, &launched.id.to_string()).await.unwrap().is_none());
        assert!(vpn_profile_service::active_profile(&fleet.db, &user.to_string()).await.unwrap().is_some());
        assert_eq!(vpn_profile_service::active_addresses(&fleet.db).await.unwrap().len(), 1);
        assert!(matches!(host_service::get_host(&fleet.db, host.id).await, Err(FleetError::NotFound(_))));
        assert!(matches!(fleet.orchestrator.deregister_host(host.id).await, Err(FleetError::NotFound(_))));
    }

    #[tokio::test]
    async fn probe_reaches_the_hosts_agent() {
        let fleet = TestFleet::new().await;
        let host = healthy_host(&fleet.db, "a", 2).await;
        assert_eq!(fleet.orchestrator.probe_host(host.id).await.unwrap().uptime_seconds, 60);
        assert!(matches!(fleet.orchestrator.probe_host(Uuid::new_v4()).await, Err(FleetError::NotFound(_))));
    }
}
