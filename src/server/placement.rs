use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tracing::debug;

use crate::db::entities::host;
use crate::db::enums::HostStatus;
use crate::db::services::host_service::UTILIZATION_CRITICAL_PERCENT;
use crate::error::FleetError;

/// Whether a host may receive another container.
pub fn is_eligible(host: &host::Model) -> bool {
    host.status != HostStatus::Offline
        && host.cpu_percent < UTILIZATION_CRITICAL_PERCENT
        && host.mem_percent < UTILIZATION_CRITICAL_PERCENT
        && host.current_containers < host.max_containers
}

/// Least-loaded eligible host; ties go to the oldest registration, then the lowest id.
pub async fn select_host(db: &DatabaseConnection) -> Result<host::Model, FleetError> {
    let chosen = host::Entity::find()
        .filter(host::Column::Status.ne(HostStatus::Offline))
        .order_by_asc(host::Column::CurrentContainers)
        .order_by_asc(host::Column::CreatedAt)
        .order_by_asc(host::Column::Id)
        .all(db)
        .await?
        .into_iter()
        .find(is_eligible)
        .ok_or_else(|| FleetError::CapacityExhausted("no eligible host".to_string()))?;

    debug!(host_id = %chosen.id, load = chosen.current_containers, "Host selected for placement.");
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::services::host_service::{increment_containers, record_heartbeat, register_host};
    use crate::agent_protocol::HeartbeatRequest;
    use crate::test_support::{host_spec, test_db, JWT_SECRET};
    use chrono::Utc;

    async fn healthy_host(db: &DatabaseConnection, name: &str, max: i32, load: i32, cpu: i32, mem: i32) -> host::Model {
        let (host, _) = register_host(db, host_spec(name, max), JWT_SECRET).await.unwrap();
        for _ in 0..load {
            increment_containers(db, host.id).await.unwrap();
        }
        record_heartbeat(db, host.id, HeartbeatRequest { cpu, mem, containers: load }, Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn least_loaded_host_wins() {
        let db = test_db().await;
        let _b = healthy_host(&db, "b", 5, 3, 10, 10).await;
        let a = healthy_host(&db, "a", 2, 0, 10, 10).await;

        assert_eq!(select_host(&db).await.unwrap().id, a.id);
    }

    #[tokio::test]
    async fn offline_full_and_hot_hosts_are_skipped() {
        let db = test_db().await;
        register_host(&db, host_spec("never-seen", 5), JWT_SECRET).await.unwrap();
        healthy_host(&db, "full", 1, 1, 10, 10).await;
        healthy_host(&db, "hot-cpu", 5, 0, 90, 10).await;
        healthy_host(&db, "hot-mem", 5, 0, 10, 95).await;

        assert!(matches!(select_host(&db).await, Err(FleetError::CapacityExhausted(_))));

        let ok = healthy_host(&db, "ok", 5, 4, 89, 89).await;
        let chosen = select_host(&db).await.unwrap();
        assert_eq!(chosen.id, ok.id);
        assert!(is_eligible(&chosen));
    }

    #[tokio::test]
    async fn ties_go_to_the_oldest_host() {
        let db = test_db().await;
        let first = healthy_host(&db, "first", 3, 1, 0, 0).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        healthy_host(&db, "second", 3, 1, 0, 0).await;

        assert_eq!(select_host(&db).await.unwrap().id, first.id);
    }
}
