use clap::Parser;
use labfleet::db::schema::create_tables;
use labfleet::server::agent_client::HttpAgentClient;
use labfleet::server::config::ServerConfig;
use labfleet::server::health_monitor::HealthMonitor;
use labfleet::server::orchestrator::ContainerOrchestrator;
use labfleet::services::auth_service;
use labfleet::version::VERSION;
use labfleet::vpn::allocator::IdentityAllocator;
use labfleet::vpn::bundle::BundleStore;
use labfleet::vpn::cert_authority::EasyRsa;
use labfleet::vpn::firewall::{ForwardRuleManager, Iptables};
use labfleet::web::{create_axum_router, AppState};

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info,sea_orm=warn` if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

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
    // Checked before clap so the output stays a single line.
    if std::env::args().any(|arg| arg == "--version") {
        println!("Server version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    let server_config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&server_config.log_dir);
    info!(version = VERSION, "Starting server.");

    // --- Database ---
    let mut opt = ConnectOptions::new(server_config.database_url.to_owned());
    opt.max_connections(10);
    let db: DatabaseConnection = Database::connect(opt).await?;
    create_tables(&db).await?;

    if let (Some(email), Some(password)) = (
        server_config.admin_default_email.as_deref(),
        server_config.admin_default_password.as_deref(),
    ) {
        auth_service::bootstrap_default_admin(&db, email, password).await?;
    } else {
        warn!("No default admin configured; only existing accounts can log in.");
    }

    // --- VPN isolation ---
    let pool = server_config.address_pool()?;
    let identities = Arc::new(IdentityAllocator::new(
        db.clone(),
        Arc::new(EasyRsa::new(&server_config.easyrsa_dir)),
        pool,
        server_config.tunnel_settings(),
        BundleStore::new(&server_config.ovpn_dir, &server_config.ccd_dir),
    ));
    let rules = Arc::new(ForwardRuleManager::new(Iptables, &server_config.tunnel_interface));

    // --- Orchestration ---
    let orchestrator = Arc::new(ContainerOrchestrator::new(
        db.clone(),
        identities.clone(),
        rules.clone(),
        Arc::new(HttpAgentClient::default()),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = HealthMonitor::new(db.clone(), server_config.heartbeat_timeout());
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    // --- HTTP ---
    let app_state = Arc::new(AppState {
        db: db.clone(),
        config: server_config.clone(),
        identities,
        rules,
        orchestrator,
    });
    let app = create_axum_router(app_state);

    let addr: SocketAddr = server_config.listen_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening.");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_handle.await {
        error!(error = ?e, "Health monitor task panicked.");
    }
    db.close().await?;
    info!("Server stopped.");
    Ok(())
}
