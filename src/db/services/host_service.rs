use chrono::{DateTime, Utc};
use sea_orm::{
    prelude::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::agent_protocol::HeartbeatRequest;
use crate::db::entities::host;
use crate::db::enums::{ApiKeyOwner, HostStatus};
use crate::db::services::api_key_service;
use crate::error::FleetError;
use crate::services::auth_service::{self, KeyRole};

/// CPU or memory percentage at which a host stops receiving placements.
pub const UTILIZATION_CRITICAL_PERCENT: i32 = 90;
pub const UTILIZATION_WARNING_PERCENT: i32 = 75;

#[derive(Debug, Clone)]
pub struct HostSpec {
    pub hostname: String,
    pub ip: String,
    pub ssh_port: i32,
    pub api_port: i32,
    pub max_containers: i32,
}

#[derive(Debug, Clone, Default)]
pub struct HostUpdate {
    pub hostname: Option<String>,
    pub ip: Option<String>,
    pub ssh_port: Option<i32>,
    pub api_port: Option<i32>,
    pub max_containers: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Healthiness {
    Healthy,
    Warning,
    Critical,
    Offline,
}

/// Read-path classification from the last reported metrics. Never stored.
pub fn compute_healthiness(host: &host::Model) -> Healthiness {
    if host.status == HostStatus::Offline {
        Healthiness::Offline
    } else if host.cpu_percent >= UTILIZATION_CRITICAL_PERCENT || host.mem_percent >= UTILIZATION_CRITICAL_PERCENT {
        Healthiness::Critical
    } else if host.cpu_percent >= UTILIZATION_WARNING_PERCENT || host.mem_percent >= UTILIZATION_WARNING_PERCENT {
        Healthiness::Warning
    } else {
        Healthiness::Healthy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HostStatusSnapshot {
    pub host_id: Uuid,
    pub status: HostStatus,
    pub health: Healthiness,
    pub last_seen: Option<DateTime<Utc>>,
    pub current_containers: i32,
    pub max_containers: i32,
    pub cpu_percent: i32,
    pub mem_percent: i32,
}

impl From<&host::Model> for HostStatusSnapshot {
    fn from(host: &host::Model) -> Self {
        Self {
            host_id: host.id,
            status: host.status,
            health: compute_healthiness(host),
            last_seen: host.last_seen,
            current_containers: host.current_containers,
            max_containers: host.max_containers,
            cpu_percent: host.cpu_percent,
            mem_percent: host.mem_percent,
        }
    }
}

/// Registers a host and issues the server key its agent authenticates with.
/// The host starts offline until its first heartbeat.
pub async fn register_host(
    db: &DatabaseConnection,
    spec: HostSpec,
    jwt_secret: &str,
) -> Result<(host::Model, String), FleetError> {
    let now = Utc::now();
    let host_id = Uuid::new_v4();
    let server_key = auth_service::create_key(&host_id.to_string(), KeyRole::Server, jwt_secret)?;

    let txn = db.begin().await?;
    let host = host::ActiveModel {
        id: Set(host_id),
        hostname: Set(spec.hostname),
        ip: Set(spec.ip),
        ssh_port: Set(spec.ssh_port),
        api_port: Set(spec.api_port),
        max_containers: Set(spec.max_containers),
        current_containers: Set(0),
        reported_containers: Set(0),
        cpu_percent: Set(0),
        mem_percent: Set(0),
        status: Set(HostStatus::Offline),
        last_seen: Set(None),
        cred_ref: Set(Some(server_key.clone())),
        created_at: Set(now),
    }
    .insert(&txn)
    .await?;
    api_key_service::insert_key(&txn, ApiKeyOwner::Server, host_id, &server_key, now).await?;
    txn.commit().await?;

    info!(host_id = %host.id, hostname = %host.hostname, "Host registered.");
    Ok((host, server_key))
}

pub async fn get_host(db: &DatabaseConnection, host_id: Uuid) -> Result<host::Model, FleetError> {
    host::Entity::find_by_id(host_id)
        .one(db)
        .await?
        .ok_or_else(|| FleetError::not_found(format!("host {host_id}")))
}

pub async fn list_hosts(db: &DatabaseConnection) -> Result<Vec<host::Model>, DbErr> {
    host::Entity::find()
        .order_by_asc(host::Column::CreatedAt)
        .order_by_asc(host::Column::Id)
        .all(db)
        .await
}

pub async fn get_host_status(db: &DatabaseConnection, host_id: Uuid) -> Result<HostStatusSnapshot, FleetError> {
    let host = get_host(db, host_id).await?;
    Ok(HostStatusSnapshot::from(&host))
}

/// Applies only the supplied fields.
pub async fn update_host(
    db: &DatabaseConnection,
    host_id: Uuid,
    update: HostUpdate,
) -> Result<host::Model, FleetError> {
    let mut active = get_host(db, host_id).await?.into_active_model();
    if let Some(val) = update.hostname { active.hostname = Set(val); }
    if let Some(val) = update.ip { active.ip = Set(val); }
    if let Some(val) = update.ssh_port { active.ssh_port = Set(val); }
    if let Some(val) = update.api_port { active.api_port = Set(val); }
    if let Some(val) = update.max_containers { active.max_containers = Set(val); }
    Ok(active.update(db).await?)
}

/// Revokes every server key of the host, then deletes it. Its container rows cascade,
/// so callers retire their overlay identities first.
pub async fn deregister_host(db: &DatabaseConnection, host_id: Uuid) -> Result<(), FleetError> {
    let txn = db.begin().await?;
    if host::Entity::find_by_id(host_id).one(&txn).await?.is_none() {
        return Err(FleetError::not_found(format!("host {host_id}")));
    }
    let revoked = api_key_service::expire_keys_for_owner(&txn, ApiKeyOwner::Server, host_id, Utc::now()).await?;
    host::Entity::delete_by_id(host_id).exec(&txn).await?;
    txn.commit().await?;

    info!(host_id = %host_id, revoked_keys = revoked, "Host deregistered.");
    Ok(())
}

/// Heartbeat ingestion: the only path that marks a host healthy.
pub async fn record_heartbeat(
    db: &DatabaseConnection,
    host_id: Uuid,
    report: HeartbeatRequest,
    now: DateTime<Utc>,
) -> Result<host::Model, FleetError> {
    let mut active = get_host(db, host_id).await?.into_active_model();
    active.cpu_percent = Set(report.cpu);
    active.mem_percent = Set(report.mem);
    active.reported_containers = Set(report.containers);
    active.last_seen = Set(Some(now));
    active.status = Set(HostStatus::Healthy);
    Ok(active.update(db).await?)
}

/// Marks `host` offline unless it is already offline or a heartbeat landed since it was read.
/// Returns whether a row changed.
pub async fn mark_offline_if_unchanged(db: &DatabaseConnection, host: &host::Model) -> Result<bool, DbErr> {
    let mut update = host::Entity::update_many()
        .col_expr(
            host::Column::Status,
            Expr::value(sea_orm::Value::String(Some(Box::new(HostStatus::Offline.to_value())))),
        )
        .filter(host::Column::Id.eq(host.id))
        .filter(host::Column::Status.ne(HostStatus::Offline));
    update = match host.last_seen {
        Some(seen) => update.filter(host::Column::LastSeen.eq(seen)),
        None => update.filter(host::Column::LastSeen.is_null()),
    };
    let result = update.exec(db).await?;
    Ok(result.rows_affected > 0)
}

pub async fn increment_containers<C: ConnectionTrait>(conn: &C, host_id: Uuid) -> Result<u64, DbErr> {
    let result = host::Entity::update_many()
        .col_expr(
            host::Column::CurrentContainers,
            Expr::col(host::Column::CurrentContainers).add(1),
        )
        .filter(host::Column::Id.eq(host_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Decrements the counter, floored at zero.
pub async fn decrement_containers<C: ConnectionTrait>(conn: &C, host_id: Uuid) -> Result<u64, DbErr> {
    let result = host::Entity::update_many()
        .col_expr(
            host::Column::CurrentContainers,
            Expr::col(host::Column::CurrentContainers).sub(1),
        )
        .filter(host::Column::Id.eq(host_id))
        .filter(host::Column::CurrentContainers.gt(0))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
