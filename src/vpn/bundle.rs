use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::vpn::cert_authority::IssuedCredential;

/// Where clients connect to and how the tunnel is set up.
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub host: String,
    pub port: u16,
    pub proto: String,
    pub dev: String,
}

/// Renders an inline client profile with every credential embedded.
pub fn render_client_config(tunnel: &TunnelSettings, credential: &IssuedCredential) -> String {
    let lines = [
        "client".to_string(),
        format!("dev {}", tunnel.dev),
        format!("proto {}", tunnel.proto),
        format!("remote {} {}", tunnel.host, tunnel.port),
        "nobind".to_string(),
        "remote-cert-tls server".to_string(),
        "<ca>".to_string(),
        credential.ca.trim().to_string(),
        "</ca>".to_string(),
        "<cert>".to_string(),
        credential.cert.trim().to_string(),
        "</cert>".to_string(),
        "<key>".to_string(),
        credential.key.trim().to_string(),
        "</key>".to_string(),
        "key-direction 1".to_string(),
        "<tls-auth>".to_string(),
        credential.tls_auth.trim().to_string(),
        "</tls-auth>".to_string(),
        "verb 3".to_string(),
    ];
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Per-client static address directive read by the VPN server.
pub fn render_static_route(ip: Ipv4Addr, netmask: Ipv4Addr) -> String {
    format!("ifconfig-push {ip} {netmask}\n")
}

/// On-disk home of client profiles (`<ovpn_dir>/<name>.ovpn`) and static
/// routes (`<ccd_dir>/<name>`).
#[derive(Debug, Clone)]
pub struct BundleStore {
    ovpn_dir: PathBuf,
    ccd_dir: PathBuf,
}

impl BundleStore {
    pub fn new(ovpn_dir: impl Into<PathBuf>, ccd_dir: impl Into<PathBuf>) -> Self {
        Self { ovpn_dir: ovpn_dir.into(), ccd_dir: ccd_dir.into() }
    }

    pub fn config_path(&self, client_name: &str) -> PathBuf {
        self.ovpn_dir.join(format!("{client_name}.ovpn"))
    }

    pub fn route_path(&self, client_name: &str) -> PathBuf {
        self.ccd_dir.join(client_name)
    }

    /// Writes the profile and the static route, returning the profile path.
    pub async fn write(
        &self,
        client_name: &str,
        profile: &str,
        static_route: &str,
    ) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.ovpn_dir).await?;
        tokio::fs::create_dir_all(&self.ccd_dir).await?;

        let config_path = self.config_path(client_name);
        tokio::fs::write(&config_path, profile).await?;
        self.write_route(client_name, static_route).await?;
        Ok(config_path)
    }

    pub async fn write_route(&self, client_name: &str, static_route: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.ccd_dir).await?;
        tokio::fs::write(self.route_path(client_name), static_route).await
    }

    /// Removes leftovers of an earlier identity of the same name. Missing files are fine.
    pub async fn remove(&self, client_name: &str) -> std::io::Result<()> {
        for path in [self.config_path(client_name), self.route_path(client_name)] {
            remove_if_present(&path).await?;
        }
        Ok(())
    }
}

pub(crate) async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale artifact.");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
