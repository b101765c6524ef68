use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::error::FleetError;
use crate::vpn::bundle::remove_if_present;
use crate::vpn::run_tool;

/// PEM material for one client, as embedded into its profile.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub cert: String,
    pub key: String,
    pub ca: String,
    pub tls_auth: String,
}

/// Issues client certificates. Implementations may shell out; the allocator
/// treats every failure as remote.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn issue(&self, client_name: &str) -> Result<IssuedCredential, FleetError>;

    /// Drops artifacts left by an earlier certificate of the same name so the name can be reissued.
    async fn discard(&self, client_name: &str) -> Result<(), FleetError>;
}

/// Easy-RSA working tree (`./easyrsa` next to `pki/` and `ta.key`).
#[derive(Debug, Clone)]
pub struct EasyRsa {
    dir: PathBuf,
}

impl EasyRsa {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn pki(&self) -> PathBuf {
        self.dir.join("pki")
    }

    fn artifacts(&self, client_name: &str) -> [PathBuf; 3] {
        let pki = self.pki();
        [
            pki.join("issued").join(format!("{client_name}.crt")),
            pki.join("private").join(format!("{client_name}.key")),
            pki.join("reqs").join(format!("{client_name}.req")),
        ]
    }
}

async fn read_pem(path: &Path) -> Result<String, FleetError> {
    tokio::fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| FleetError::RemoteFailure(format!("cannot read {}: {e}", path.display())))
}

#[async_trait]
impl CertificateAuthority for EasyRsa {
    async fn issue(&self, client_name: &str) -> Result<IssuedCredential, FleetError> {
        run_tool(
            "./easyrsa",
            &["--batch", "build-client-full", client_name, "nopass"],
            Some(&self.dir),
        )
        .await?;

        let pki = self.pki();
        let credential = IssuedCredential {
            cert: read_pem(&pki.join("issued").join(format!("{client_name}.crt"))).await?,
            key: read_pem(&pki.join("private").join(format!("{client_name}.key"))).await?,
            ca: read_pem(&pki.join("ca.crt")).await?,
            tls_auth: read_pem(&self.dir.join("ta.key")).await?,
        };
        info!(client_name, "Client certificate issued.");
        Ok(credential)
    }

    async fn discard(&self, client_name: &str) -> Result<(), FleetError> {
        for path in self.artifacts(client_name) {
            remove_if_present(&path).await?;
        }
        Ok(())
    }
}
