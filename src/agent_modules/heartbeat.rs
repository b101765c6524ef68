use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::agent_modules::config::AgentConfig;
use crate::agent_modules::executor::ContainerExecutor;
use crate::agent_modules::metrics::HostMetrics;
use crate::agent_protocol::{HeartbeatRequest, SERVER_KEY_HEADER};

pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the report from current utilisation and the runtime's running count.
pub async fn collect_report(executor: &ContainerExecutor, metrics: &Mutex<HostMetrics>) -> HeartbeatRequest {
    let (cpu, mem) = metrics.lock().await.sample().rounded();
    let containers = match executor.running_count().await {
        Ok(count) => i32::try_from(count).unwrap_or(i32::MAX),
        Err(e) => {
            warn!(error = %e, "Could not count running containers for heartbeat.");
            0
        }
    };
    HeartbeatRequest { cpu, mem, containers }
}

pub async fn send_heartbeat(client: &Client, config: &AgentConfig, report: &HeartbeatRequest) -> Result<(), reqwest::Error> {
    client
        .post(config.heartbeat_url())
        .header(SERVER_KEY_HEADER, &config.server_key)
        .timeout(HEARTBEAT_TIMEOUT)
        .json(report)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// Reports every `heartbeat_interval` until shutdown. Failures are logged and retried on the next tick.
pub async fn heartbeat_loop(
    config: Arc<AgentConfig>,
    executor: Arc<ContainerExecutor>,
    metrics: Arc<Mutex<HostMetrics>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = Client::new();
    let mut interval = tokio::time::interval(config.heartbeat_interval());
    info!(url = %config.heartbeat_url(), every_secs = config.heartbeat_interval_secs, "Heartbeat loop started.");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = collect_report(&executor, &metrics).await;
                match send_heartbeat(&client, &config, &report).await {
                    Ok(()) => debug!(cpu = report.cpu, mem = report.mem, containers = report.containers, "Heartbeat sent."),
                    Err(e) => warn!(error = %e, "Heartbeat failed."),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Heartbeat loop stopped.");
}
