use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::agent_protocol::{is_valid_name, ActionResponse, LaunchRequest, LiveContainer};

/// File name of the container's VPN credential inside its project directory.
pub const VPN_CREDENTIAL_FILE: &str = "vpn.ovpn";

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Environment not found: {0}")]
    NotFound(String),
    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),
    #[error("Runtime failure: {0}")]
    Runtime(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The compose tool, one project per environment.
#[async_trait]
pub trait ComposeRuntime: Send + Sync {
    async fn up(&self, project: &str, dir: &Path) -> Result<(), ExecutorError>;
    async fn build(&self, project: &str, dir: &Path) -> Result<(), ExecutorError>;
    async fn down(&self, project: &str, dir: &Path) -> Result<(), ExecutorError>;
    async fn list(&self) -> Result<Vec<LiveContainer>, ExecutorError>;
}

/// `docker compose -p <project> ...` run inside the project directory.
#[derive(Debug, Clone)]
pub struct DockerCompose {
    binary: String,
}

impl DockerCompose {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, ExecutorError> {
        let mut command = Command::new(&self.binary);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        debug!(binary = %self.binary, ?args, "Running container runtime.");

        let output = command
            .output()
            .await
            .map_err(|e| ExecutorError::Runtime(format!("failed to spawn {}: {e}", self.binary)))?;
        if !output.status.success() {
            return Err(ExecutorError::Runtime(format!(
                "'{} {}' exited with {}: {}",
                self.binary,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ComposeRuntime for DockerCompose {
    async fn up(&self, project: &str, dir: &Path) -> Result<(), ExecutorError> {
        self.run(&["compose", "-p", project, "up", "-d"], Some(dir)).await.map(|_| ())
    }

    async fn build(&self, project: &str, dir: &Path) -> Result<(), ExecutorError> {
        self.run(&["compose", "-p", project, "build"], Some(dir)).await.map(|_| ())
    }

    async fn down(&self, project: &str, dir: &Path) -> Result<(), ExecutorError> {
        self.run(&["compose", "-p", project, "down", "--volumes"], Some(dir)).await.map(|_| ())
    }

    async fn list(&self) -> Result<Vec<LiveContainer>, ExecutorError> {
        let out = self.run(&["ps", "--all", "--no-trunc", "--format", "{{json .}}"], None).await?;
        Ok(parse_ps_output(&out))
    }
}

#[derive(Deserialize)]
struct PsRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

/// Parses `docker ps --format '{{json .}}'`, one object per line.
pub fn parse_ps_output(out: &str) -> Vec<LiveContainer> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<PsRow>(line) {
            Ok(row) => Some(LiveContainer {
                id: row.id,
                name: row.names.split(',').next().unwrap_or_default().to_string(),
                image: row.image,
                status: row.state,
                ports: row
                    .ports
                    .split(", ")
                    .filter(|p| !p.is_empty())
                    .map(str::to_owned)
                    .collect(),
            }),
            Err(e) => {
                warn!(error = %e, line, "Skipping unparsable runtime listing line.");
                None
            }
        })
        .collect()
}

/// Unpacks `archive` under `dest`. Entries that would land outside `dest` reject the whole bundle.
pub fn extract_archive(archive: &[u8], dest: &Path) -> Result<usize, ExecutorError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| ExecutorError::InvalidBundle(format!("not a zip archive: {e}")))?;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ExecutorError::InvalidBundle(format!("corrupt entry {i}: {e}")))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ExecutorError::InvalidBundle(format!("entry '{}' escapes the project", entry.name())))?;
        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        io::copy(&mut entry, &mut file)?;
    }
    Ok(zip.len())
}

/// Owns `<work_dir>/<name>` project directories and drives the runtime over them.
pub struct ContainerExecutor {
    work_dir: PathBuf,
    runtime: Arc<dyn ComposeRuntime>,
}

impl ContainerExecutor {
    pub fn new(work_dir: impl Into<PathBuf>, runtime: Arc<dyn ComposeRuntime>) -> Self {
        Self { work_dir: work_dir.into(), runtime }
    }

    fn project_dir(&self, name: &str) -> Result<PathBuf, ExecutorError> {
        if !is_valid_name(name) {
            return Err(ExecutorError::InvalidBundle(format!("invalid environment name '{name}'")));
        }
        Ok(self.work_dir.join(name))
    }

    fn existing_project_dir(&self, name: &str) -> Result<PathBuf, ExecutorError> {
        let dir = self.project_dir(name)?;
        if !dir.is_dir() {
            return Err(ExecutorError::NotFound(name.to_string()));
        }
        Ok(dir)
    }

    pub async fn list(&self) -> Result<Vec<LiveContainer>, ExecutorError> {
        self.runtime.list().await
    }

    pub async fn running_count(&self) -> Result<usize, ExecutorError> {
        Ok(self
            .runtime
            .list()
            .await?
            .iter()
            .filter(|c| c.status.eq_ignore_ascii_case("running"))
            .count())
    }

    /// Replaces the project directory with the unpacked bundle plus its VPN credential, then starts it.
    pub async fn launch(&self, request: LaunchRequest) -> Result<ActionResponse, ExecutorError> {
        let target = self.project_dir(&request.name)?;
        let archive = STANDARD
            .decode(request.environment_bundle.as_bytes())
            .map_err(|e| ExecutorError::InvalidBundle(format!("environment bundle is not base64: {e}")))?;
        let credential = STANDARD
            .decode(request.vpn_credential.as_bytes())
            .map_err(|e| ExecutorError::InvalidBundle(format!("VPN credential is not base64: {e}")))?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(&self.work_dir)?;
        let staging_path = staging.path().to_path_buf();

        let extracted = tokio::task::spawn_blocking({
            let dest = staging_path.clone();
            move || extract_archive(&archive, &dest)
        })
        .await
        .map_err(|e| ExecutorError::Runtime(format!("extraction task failed: {e}")))??;
        tokio::fs::write(staging_path.join(VPN_CREDENTIAL_FILE), credential).await?;

        if tokio::fs::metadata(&target).await.is_ok() {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::rename(&staging_path, &target).await?;

        self.runtime.up(&request.name, &target).await?;
        info!(name = %request.name, entries = extracted, "Environment started.");
        Ok(ActionResponse { name: request.name, status: "started".to_string() })
    }

    pub async fn restart(&self, name: &str) -> Result<ActionResponse, ExecutorError> {
        let dir = self.existing_project_dir(name)?;
        self.runtime.build(name, &dir).await?;
        self.runtime.up(name, &dir).await?;
        info!(name, "Environment rebuilt and restarted.");
        Ok(ActionResponse { name: name.to_string(), status: "restarted".to_string() })
    }

    pub async fn delete(&self, name: &str) -> Result<ActionResponse, ExecutorError> {
        let dir = self.existing_project_dir(name)?;
        self.runtime.down(name, &dir).await?;
        tokio::fs::remove_dir_all(&dir).await?;
        info!(name, "Environment removed.");
        Ok(ActionResponse { name: name.to_string(), status: "removed".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{zip_bundle, FakeRuntime};

    fn launch_request(name: &str, archive: &[u8]) -> LaunchRequest {
        LaunchRequest {
            name: name.to_string(),
            environment_bundle: STANDARD.encode(archive),
            vpn_credential: STANDARD.encode(b"client\n"),
        }
    }

    #[test]
    fn ps_lines_are_parsed() {
        let out = concat!(
            r#"{"ID":"abc","Names":"6f1c-web-1","Image":"nginx:latest","State":"running","Ports":"0.0.0.0:80->80/tcp, 443/tcp"}"#,
            "\n",
            "not json\n",
            r#"{"ID":"def","Names":"other","State":"exited","Ports":""}"#,
            "\n"
        );
        let parsed = parse_ps_output(out);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "6f1c-web-1");
        assert_eq!(parsed[0].ports, vec!["0.0.0.0:80->80/tcp", "443/tcp"]);
        assert_eq!(parsed[1].status, "exited");
        assert!(parsed[1].ports.is_empty());
        assert_eq!(parsed[1].image, "");
    }

    #[tokio::test]
    async fn launch_unpacks_and_starts() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let executor = ContainerExecutor::new(dir.path(), runtime.clone());
        let archive = zip_bundle(&[("docker-compose.yml", "services: {}\n"), ("app/index.html", "hi")]);

        let resp = executor.launch(launch_request("env1", &archive)).await.unwrap();

        assert_eq!(resp.status, "started");
        let project = dir.path().join("env1");
        assert_eq!(std::fs::read_to_string(project.join("docker-compose.yml")).unwrap(), "services: {}\n");
        assert_eq!(std::fs::read_to_string(project.join("app/index.html")).unwrap(), "hi");
        assert_eq!(std::fs::read_to_string(project.join(VPN_CREDENTIAL_FILE)).unwrap(), "client\n");
        assert_eq!(runtime.calls(), vec!["up env1"]);

        // A relaunch replaces the previous content.
        let archive = zip_bundle(&[("docker-compose.yml", "v2")]);
        executor.launch(launch_request("env1", &archive)).await.unwrap();
        assert!(!project.join("app").exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn hostile_bundles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let executor = ContainerExecutor::new(dir.path().join("work"), runtime.clone());

        let escaping = zip_bundle(&[("../evil.txt", "x")]);
        assert!(matches!(
            executor.launch(launch_request("env1", &escaping)).await,
            Err(ExecutorError::InvalidBundle(_))
        ));
        assert!(!dir.path().join("evil.txt").exists());
        assert!(!dir.path().join("work/env1").exists());

        assert!(matches!(
            executor.launch(launch_request("../env1", &zip_bundle(&[]))).await,
            Err(ExecutorError::InvalidBundle(_))
        ));
        let mut bad = launch_request("env1", b"");
        bad.environment_bundle = "%%%".into();
        assert!(matches!(executor.launch(bad).await, Err(ExecutorError::InvalidBundle(_))));
        assert!(matches!(
            executor.launch(launch_request("env1", b"not a zip")).await,
            Err(ExecutorError::InvalidBundle(_))
        ));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn restart_and_delete_need_an_existing_project() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let executor = ContainerExecutor::new(dir.path(), runtime.clone());

        assert!(matches!(executor.restart("env1").await, Err(ExecutorError::NotFound(_))));
        assert!(matches!(executor.delete("env1").await, Err(ExecutorError::NotFound(_))));

        executor.launch(launch_request("env1", &zip_bundle(&[("docker-compose.yml", "x")]))).await.unwrap();
        assert_eq!(executor.restart("env1").await.unwrap().status, "restarted");
        assert_eq!(executor.delete("env1").await.unwrap().status, "removed");
        assert!(!dir.path().join("env1").exists());
        assert_eq!(runtime.calls(), vec!["up env1", "build env1", "up env1", "down env1"]);
    }

    #[tokio::test]
    async fn runtime_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::failing());
        let executor = ContainerExecutor::new(dir.path(), runtime);
        assert!(matches!(
            executor.launch(launch_request("env1", &zip_bundle(&[("docker-compose.yml", "x")]))).await,
            Err(ExecutorError::Runtime(_))
        ));
    }
}
