//! Shared fixtures for store-backed and collaborator-backed tests.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tempfile::TempDir;
use uuid::Uuid;

use crate::agent_modules::executor::{ComposeRuntime, ExecutorError};
use crate::agent_protocol::{ActionResponse, AgentHealth, HeartbeatRequest, LaunchRequest, LiveContainer};
use crate::db::entities::host;
use crate::db::enums::HostStatus;
use crate::db::schema::create_tables;
use crate::db::services::host_service::{self, HostSpec};
use crate::error::FleetError;
use crate::server::agent_client::{AgentApi, AgentEndpoint, DeleteOutcome};
use crate::server::config::ServerConfig;
use crate::server::orchestrator::ContainerOrchestrator;
use crate::vpn::address_pool::AddressPool;
use crate::vpn::allocator::IdentityAllocator;
use crate::vpn::bundle::{BundleStore, TunnelSettings};
use crate::vpn::cert_authority::{CertificateAuthority, IssuedCredential};
use crate::vpn::firewall::{ForwardRuleManager, IsolationRules, RuleTable};

pub const JWT_SECRET: &str = "test-secret";

/// Fresh in-memory store. A single pooled connection keeps every query on the same database.
pub async fn test_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    create_tables(&db).await.unwrap();
    db
}

pub fn host_spec(hostname: &str, max_containers: i32) -> HostSpec {
    HostSpec {
        hostname: hostname.to_string(),
        ip: "192.0.2.10".to_string(),
        ssh_port: 22,
        api_port: 8003,
        max_containers,
    }
}

pub fn host_model() -> host::Model {
    host::Model {
        id: Uuid::new_v4(),
        hostname: "h".into(),
        ip: "192.0.2.10".into(),
        ssh_port: 22,
        api_port: 8003,
        max_containers: 4,
        current_containers: 0,
        reported_containers: 0,
        cpu_percent: 0,
        mem_percent: 0,
        status: HostStatus::Offline,
        last_seen: None,
        cred_ref: Some("key".into()),
        created_at: Utc::now(),
    }
}

/// Registers a host and brings it online with low utilisation.
pub async fn healthy_host(db: &DatabaseConnection, hostname: &str, max_containers: i32) -> host::Model {
    let (host, _) = host_service::register_host(db, host_spec(hostname, max_containers), JWT_SECRET)
        .await
        .unwrap();
    host_service::record_heartbeat(db, host.id, HeartbeatRequest { cpu: 10, mem: 10, containers: 0 }, Utc::now())
        .await
        .unwrap()
}

#[derive(Default)]
pub struct FakeCa {
    fail: bool,
    issued: Mutex<Vec<String>>,
    discarded: Mutex<Vec<String>>,
}

impl FakeCa {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn issued_count(&self) -> usize {
        self.issued.lock().unwrap().len()
    }

    pub fn discarded(&self) -> Vec<String> {
        self.discarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl CertificateAuthority for FakeCa {
    async fn issue(&self, client_name: &str) -> Result<IssuedCredential, FleetError> {
        if self.fail {
            return Err(FleetError::RemoteFailure("easyrsa exited with 1".to_string()));
        }
        self.issued.lock().unwrap().push(client_name.to_string());
        Ok(IssuedCredential {
            cert: format!("cert-for-{client_name}"),
            key: format!("key-for-{client_name}"),
            ca: "test-ca".to_string(),
            tls_auth: "test-ta".to_string(),
        })
    }

    async fn discard(&self, client_name: &str) -> Result<(), FleetError> {
        self.discarded.lock().unwrap().push(client_name.to_string());
        Ok(())
    }
}

pub fn test_tunnel() -> TunnelSettings {
    TunnelSettings { host: "vpn.example.com".into(), port: 1194, proto: "udp".into(), dev: "tun".into() }
}

pub fn test_allocator(db: &DatabaseConnection, ca: Arc<FakeCa>, cidr: &str, dir: &Path) -> IdentityAllocator {
    IdentityAllocator::new(
        db.clone(),
        ca,
        AddressPool::parse(cidr).unwrap(),
        test_tunnel(),
        BundleStore::new(dir.join("ovpns"), dir.join("ccd")),
    )
}

/// In-memory FORWARD chain that prints rules the way `iptables -S` does.
#[derive(Clone, Default)]
pub struct FakeRuleTable {
    rules: Arc<Mutex<Vec<String>>>,
    listing_fails: Arc<Mutex<bool>>,
}

impl FakeRuleTable {
    pub fn seed(&self, rule: &str) {
        self.rules.lock().unwrap().push(rule.to_string());
    }

    pub fn rules(&self) -> Vec<String> {
        self.rules.lock().unwrap().clone()
    }

    pub fn fail_listing(&self) {
        *self.listing_fails.lock().unwrap() = true;
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> &'a str {
    args.windows(2)
        .find(|pair| pair[0] == flag)
        .map(|pair| pair[1].as_str())
        .unwrap_or("")
}

#[async_trait]
impl RuleTable for FakeRuleTable {
    async fn list_forward(&self) -> Result<Vec<String>, FleetError> {
        if *self.listing_fails.lock().unwrap() {
            return Err(FleetError::RemoteFailure("iptables exited with 4".to_string()));
        }
        let mut out = vec!["-P FORWARD ACCEPT".to_string()];
        out.extend(self.rules());
        Ok(out)
    }

    async fn apply(&self, args: &[String]) -> Result<(), FleetError> {
        let mut rules = self.rules.lock().unwrap();
        match args.first().map(String::as_str) {
            Some("-I") => {
                let rule = format!(
                    "-A FORWARD -s {}/32 -d {}/32 -i {} -o {} -j {}",
                    flag_value(args, "-s"),
                    flag_value(args, "-d"),
                    flag_value(args, "-i"),
                    flag_value(args, "-o"),
                    flag_value(args, "-j"),
                );
                rules.insert(0, rule);
                Ok(())
            }
            Some("-D") => {
                let target = format!("-A {}", args[1..].join(" "));
                match rules.iter().position(|r| *r == target) {
                    Some(idx) => {
                        rules.remove(idx);
                        Ok(())
                    }
                    None => Err(FleetError::RemoteFailure("Bad rule (does a matching rule exist in that chain?)".into())),
                }
            }
            _ => Err(FleetError::RemoteFailure(format!("unsupported iptables call {args:?}"))),
        }
    }
}

#[derive(Default)]
struct FakeAgentState {
    launches: Vec<LaunchRequest>,
    environments: HashSet<String>,
    live: Vec<LiveContainer>,
    fail_launches: bool,
}

/// Agent double keeping the set of environments it was told to run.
#[derive(Default)]
pub struct FakeAgent {
    state: Mutex<FakeAgentState>,
}

impl FakeAgent {
    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn fail_launches(&self) {
        self.state.lock().unwrap().fail_launches = true;
    }

    pub fn forget_environments(&self) {
        self.state.lock().unwrap().environments.clear();
    }

    pub fn set_live(&self, live: Vec<LiveContainer>) {
        self.state.lock().unwrap().live = live;
    }
}

#[async_trait]
impl AgentApi for FakeAgent {
    async fn list(&self, _endpoint: &AgentEndpoint) -> Result<Vec<LiveContainer>, FleetError> {
        Ok(self.state.lock().unwrap().live.clone())
    }

    async fn launch(&self, _endpoint: &AgentEndpoint, request: &LaunchRequest) -> Result<ActionResponse, FleetError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_launches {
            return Err(FleetError::RemoteFailure("agent launch returned 500: compose up failed".to_string()));
        }
        state.launches.push(request.clone());
        state.environments.insert(request.name.clone());
        Ok(ActionResponse { name: request.name.clone(), status: "started".to_string() })
    }

    async fn restart(&self, _endpoint: &AgentEndpoint, name: &str) -> Result<ActionResponse, FleetError> {
        if !self.state.lock().unwrap().environments.contains(name) {
            return Err(FleetError::not_found(format!("environment {name} on agent")));
        }
        Ok(ActionResponse { name: name.to_string(), status: "restarted".to_string() })
    }

    async fn delete(&self, _endpoint: &AgentEndpoint, name: &str) -> Result<DeleteOutcome, FleetError> {
        if self.state.lock().unwrap().environments.remove(name) {
            Ok(DeleteOutcome::Removed)
        } else {
            Ok(DeleteOutcome::AlreadyGone)
        }
    }

    async fn health(&self, _endpoint: &AgentEndpoint) -> Result<AgentHealth, FleetError> {
        Ok(AgentHealth { uptime_seconds: 60, running_containers: 0, mem_percent: 10.0, cpu_percent: 10.0 })
    }
}

pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        database_url: "sqlite::memory:".into(),
        jwt_secret: JWT_SECRET.into(),
        listen_address: "127.0.0.1:0".into(),
        vpn_subnet: "10.8.0.0/24".into(),
        openvpn_server_host: "vpn.example.com".into(),
        openvpn_server_port: 1194,
        openvpn_proto: "udp".into(),
        openvpn_dev: "tun".into(),
        tunnel_interface: "tun0".into(),
        easyrsa_dir: dir.join("easy-rsa").to_string_lossy().into_owned(),
        ovpn_dir: dir.join("ovpns").to_string_lossy().into_owned(),
        ccd_dir: dir.join("ccd").to_string_lossy().into_owned(),
        heartbeat_timeout_secs: 30,
        log_dir: dir.join("logs").to_string_lossy().into_owned(),
        admin_default_email: None,
        admin_default_password: None,
    }
}

/// The control plane wired to fakes: CA, rule table and agent.
pub struct TestFleet {
    pub db: DatabaseConnection,
    pub dir: TempDir,
    pub ca: Arc<FakeCa>,
    pub table: FakeRuleTable,
    pub agent: Arc<FakeAgent>,
    pub identities: Arc<IdentityAllocator>,
    pub rules: Arc<dyn IsolationRules>,
    pub orchestrator: Arc<ContainerOrchestrator>,
}

impl TestFleet {
    pub async fn new() -> Self {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let ca = Arc::new(FakeCa::default());
        let identities = Arc::new(test_allocator(&db, ca.clone(), "10.8.0.0/24", dir.path()));
        let table = FakeRuleTable::default();
        let rules: Arc<dyn IsolationRules> = Arc::new(ForwardRuleManager::new(table.clone(), "tun0"));
        let agent = Arc::new(FakeAgent::default());
        let orchestrator = Arc::new(ContainerOrchestrator::new(
            db.clone(),
            identities.clone(),
            rules.clone(),
            agent.clone(),
        ));
        Self { db, dir, ca, table, agent, identities, rules, orchestrator }
    }
}

/// Compose runtime double recording `"<verb> <project>"` for every call.
#[derive(Default)]
pub struct FakeRuntime {
    fail: bool,
    calls: Mutex<Vec<String>>,
    live: Mutex<Vec<LiveContainer>>,
}

impl FakeRuntime {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_live(&self, live: Vec<LiveContainer>) {
        *self.live.lock().unwrap() = live;
    }

    fn record(&self, verb: &str, project: &str) -> Result<(), ExecutorError> {
        if self.fail {
            return Err(ExecutorError::Runtime(format!("compose {verb} failed")));
        }
        self.calls.lock().unwrap().push(format!("{verb} {project}"));
        Ok(())
    }
}

#[async_trait]
impl ComposeRuntime for FakeRuntime {
    async fn up(&self, project: &str, _dir: &Path) -> Result<(), ExecutorError> {
        self.record("up", project)
    }

    async fn build(&self, project: &str, _dir: &Path) -> Result<(), ExecutorError> {
        self.record("build", project)
    }

    async fn down(&self, project: &str, _dir: &Path) -> Result<(), ExecutorError> {
        self.record("down", project)
    }

    async fn list(&self) -> Result<Vec<LiveContainer>, ExecutorError> {
        Ok(self.live.lock().unwrap().clone())
    }
}

/// Builds an uncompressed zip with the given `(path, contents)` entries.
pub fn zip_bundle(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (path, contents) in entries {
        writer.start_file(*path, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
