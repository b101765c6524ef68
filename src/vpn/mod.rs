//! OpenVPN overlay: client identities with static addresses, and the firewall
//! rules that pair a user with the containers they own.

pub mod address_pool;
pub mod allocator;
pub mod bundle;
pub mod cert_authority;
pub mod firewall;

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::FleetError;
use crate::vpn::allocator::{IdentityAllocator, IdentityBundle};
use crate::vpn::firewall::IsolationRules;

/// Runs a local tool to completion and returns its stdout. A spawn failure or a
/// non-zero exit becomes `RemoteFailure` carrying stderr.
pub(crate) async fn run_tool(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<String, FleetError> {
    let mut command = Command::new(program);
    command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    debug!(program, ?args, "Running tool.");

    let output = command
        .output()
        .await
        .map_err(|e| FleetError::RemoteFailure(format!("failed to spawn {program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FleetError::RemoteFailure(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Drops the rules of the current address and revokes the identity. Returns the
/// number of profiles revoked.
pub async fn retire_identity(
    identities: &IdentityAllocator,
    rules: &dyn IsolationRules,
    client_name: &str,
) -> Result<u64, FleetError> {
    if let Some(current) = identities.active_identity(client_name).await? {
        rules.revoke(current.address).await?;
    }
    identities.revoke(client_name).await
}

/// Replaces the identity of `client_name` with a freshly issued one.
pub async fn rotate_identity(
    identities: &IdentityAllocator,
    rules: &dyn IsolationRules,
    client_name: &str,
) -> Result<IdentityBundle, FleetError> {
    retire_identity(identities, rules, client_name).await?;
    let fresh = identities.ensure_identity(client_name).await?;
    info!(client_name, address = %fresh.address, "VPN identity rotated.");
    Ok(fresh)
}
