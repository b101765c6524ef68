use clap::Parser;
use labfleet::agent_modules::config::{AgentConfig, DEFAULT_CONFIG_PATH};
use labfleet::agent_modules::executor::{ContainerExecutor, DockerCompose};
use labfleet::agent_modules::heartbeat::heartbeat_loop;
use labfleet::agent_modules::metrics::HostMetrics;
use labfleet::agent_modules::routes::{create_agent_router, AgentState};
use labfleet::version::VERSION;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the agent configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "agent.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler.");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler.");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("Agent version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    let config = match AgentConfig::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Critical error loading agent configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!(version = VERSION, host_id = %config.host_id, "Starting agent.");

    let executor = Arc::new(ContainerExecutor::new(
        &config.work_dir,
        Arc::new(DockerCompose::new(&config.docker_binary)),
    ));
    let metrics = Arc::new(Mutex::new(HostMetrics::new()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat_handle = tokio::spawn(heartbeat_loop(
        config.clone(),
        executor.clone(),
        metrics.clone(),
        shutdown_rx,
    ));

    let app = create_agent_router(AgentState {
        server_key: Arc::from(config.server_key.as_str()),
        executor,
        metrics,
    });

    let addr: SocketAddr = config.listen_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Agent API listening.");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = heartbeat_handle.await {
        error!(error = ?e, "Heartbeat task panicked.");
    }
    info!("Agent stopped.");
    Ok(())
}
