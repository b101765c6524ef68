use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::db::entities::host;
use crate::db::enums::HostStatus;
use crate::db::services::host_service;
use crate::error::FleetError;

/// A host is stale when it never reported or its last report is older than `timeout`.
pub fn is_stale(host: &host::Model, now: DateTime<Utc>, timeout: Duration) -> bool {
    match host.last_seen {
        None => true,
        Some(seen) => match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now - seen > timeout,
            Err(_) => false,
        },
    }
}

/// Periodically marks silent hosts offline. Hosts are never deleted here.
pub struct HealthMonitor {
    db: DatabaseConnection,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// One sweep. Returns the number of hosts marked offline.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, FleetError> {
        let hosts = host_service::list_hosts(&self.db).await?;
        let mut marked = 0;
        for host in hosts
            .iter()
            .filter(|h| h.status != HostStatus::Offline && is_stale(h, now, self.timeout))
        {
            if host_service::mark_offline_if_unchanged(&self.db, host).await? {
                warn!(host_id = %host.id, hostname = %host.hostname, last_seen = ?host.last_seen, "Host missed its heartbeat, marked offline.");
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Ticks every `timeout` until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.timeout);
        info!(period_secs = self.timeout.as_secs(), "Health monitor started.");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Health monitor sweep failed.");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Health monitor stopped.");
    }
}
