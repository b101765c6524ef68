use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tracing::{info, warn};

use crate::agent_protocol::is_valid_name;
use crate::db::entities::vpn_profile;
use crate::db::services::vpn_profile_service;
use crate::error::{is_unique_violation, FleetError};
use crate::vpn::address_pool::AddressPool;
use crate::vpn::bundle::{render_client_config, render_static_route, BundleStore, TunnelSettings};
use crate::vpn::cert_authority::CertificateAuthority;

/// An active VPN identity: who, which static address, and where its profile lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityBundle {
    pub client_name: String,
    pub address: Ipv4Addr,
    pub config_path: PathBuf,
}

impl TryFrom<vpn_profile::Model> for IdentityBundle {
    type Error = FleetError;

    fn try_from(profile: vpn_profile::Model) -> Result<Self, Self::Error> {
        let address = profile
            .ip_address
            .parse()
            .map_err(|_| FleetError::Internal(format!("stored address '{}' is not IPv4", profile.ip_address)))?;
        Ok(Self {
            client_name: profile.client_name,
            address,
            config_path: PathBuf::from(profile.config_path),
        })
    }
}

/// Hands out one certificate and one static overlay address per client name.
/// Concurrent callers are arbitrated by the store's unique indexes, not by locks.
pub struct IdentityAllocator {
    db: DatabaseConnection,
    ca: Arc<dyn CertificateAuthority>,
    pool: AddressPool,
    tunnel: TunnelSettings,
    bundles: BundleStore,
}

impl IdentityAllocator {
    pub fn new(
        db: DatabaseConnection,
        ca: Arc<dyn CertificateAuthority>,
        pool: AddressPool,
        tunnel: TunnelSettings,
        bundles: BundleStore,
    ) -> Self {
        Self { db, ca, pool, tunnel, bundles }
    }

    pub async fn active_identity(&self, client_name: &str) -> Result<Option<IdentityBundle>, FleetError> {
        vpn_profile_service::active_profile(&self.db, client_name)
            .await?
            .map(IdentityBundle::try_from)
            .transpose()
    }

    /// Returns the active identity of `client_name`, creating it when none exists.
    pub async fn ensure_identity(&self, client_name: &str) -> Result<IdentityBundle, FleetError> {
        if !is_valid_name(client_name) {
            return Err(FleetError::InvalidInput(format!("invalid client name '{client_name}'")));
        }
        if let Some(existing) = self.active_identity(client_name).await? {
            return Ok(existing);
        }

        self.ca.discard(client_name).await?;
        self.bundles.remove(client_name).await?;
        let config_path = self.bundles.config_path(client_name);
        let path_str = config_path.to_string_lossy();

        // Files are written only once the row is ours, so a lost race never
        // overwrites the winner's static route.
        let mut rendered: Option<String> = None;
        let mut lost: HashSet<Ipv4Addr> = HashSet::new();
        loop {
            let held: HashSet<Ipv4Addr> = vpn_profile_service::active_addresses(&self.db)
                .await?
                .iter()
                .filter_map(|ip| ip.parse().ok())
                .collect();
            let address = self
                .pool
                .lowest_free(|ip| held.contains(&ip) || lost.contains(&ip))
                .ok_or_else(|| FleetError::CapacityExhausted("no free address in the VPN subnet".to_string()))?;

            let profile = match rendered.take() {
                Some(profile) => profile,
                None => render_client_config(&self.tunnel, &self.ca.issue(client_name).await?),
            };

            match vpn_profile_service::insert_profile(&self.db, client_name, &address.to_string(), &path_str, Utc::now())
                .await
            {
                Ok(row) => {
                    let route = render_static_route(address, self.pool.netmask());
                    if let Err(err) = self.bundles.write(client_name, &profile, &route).await {
                        warn!(client_name, %address, error = %err, "Writing VPN artifacts failed, releasing the address.");
                        vpn_profile_service::revoke_profiles(&self.db, client_name).await?;
                        return Err(err.into());
                    }
                    info!(client_name, %address, "VPN identity allocated.");
                    return IdentityBundle::try_from(row);
                }
                Err(err) if is_unique_violation(&err) => {
                    if let Some(winner) = self.active_identity(client_name).await? {
                        // The cleanup above may have raced the winner's own write.
                        let route = render_static_route(winner.address, self.pool.netmask());
                        self.bundles.write_route(client_name, &route).await?;
                        info!(client_name, address = %winner.address, "Concurrent allocation won, reusing it.");
                        return Ok(winner);
                    }
                    warn!(client_name, %address, "Address taken concurrently, trying the next one.");
                    lost.insert(address);
                    rendered = Some(profile);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Tombstones every active profile of `client_name`. Files stay until the name is reissued.
    pub async fn revoke(&self, client_name: &str) -> Result<u64, FleetError> {
        let revoked = vpn_profile_service::revoke_profiles(&self.db, client_name).await?;
        if revoked > 0 {
            info!(client_name, revoked, "VPN identity revoked.");
        }
        Ok(revoked)
    }
}
