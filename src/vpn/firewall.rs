use std::net::Ipv4Addr;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::FleetError;
use crate::vpn::run_tool;

/// Point-to-point reachability between overlay addresses.
#[async_trait]
pub trait IsolationRules: Send + Sync {
    /// Allows traffic between `a` and `b` in both directions.
    async fn allow(&self, a: Ipv4Addr, b: Ipv4Addr) -> Result<(), FleetError>;

    /// Removes every rule that references `addr`. Returns how many were removed.
    async fn revoke(&self, addr: Ipv4Addr) -> Result<usize, FleetError>;
}

/// The FORWARD chain of a packet filter.
#[async_trait]
pub trait RuleTable: Send + Sync {
    /// Rules in `-S` form (`-A FORWARD ...`).
    async fn list_forward(&self) -> Result<Vec<String>, FleetError>;

    async fn apply(&self, args: &[String]) -> Result<(), FleetError>;
}

#[derive(Debug, Clone, Default)]
pub struct Iptables;

#[async_trait]
impl RuleTable for Iptables {
    async fn list_forward(&self) -> Result<Vec<String>, FleetError> {
        let out = run_tool("iptables", &["-S", "FORWARD"], None).await?;
        Ok(out.lines().map(str::to_owned).collect())
    }

    async fn apply(&self, args: &[String]) -> Result<(), FleetError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_tool("iptables", &args, None).await.map(|_| ())
    }
}

/// ACCEPT rules on the tunnel interface, one per direction.
pub struct ForwardRuleManager<T> {
    table: T,
    interface: String,
}

impl<T: RuleTable> ForwardRuleManager<T> {
    pub fn new(table: T, interface: impl Into<String>) -> Self {
        Self { table, interface: interface.into() }
    }

    fn insert_args(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<String> {
        let (src, dst) = (src.to_string(), dst.to_string());
        let iface = self.interface.as_str();
        ["-I", "FORWARD", "-i", iface, "-o", iface, "-s", src.as_str(), "-d", dst.as_str(), "-j", "ACCEPT"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

fn strip_host_mask(token: &str) -> &str {
    token.strip_suffix("/32").unwrap_or(token)
}

/// True when a listed rule is a tunnel-to-tunnel rule whose source or
/// destination is exactly `addr`.
pub fn rule_references(rule: &str, interface: &str, addr: Ipv4Addr) -> bool {
    let tokens: Vec<&str> = rule.split_whitespace().collect();
    let value_of = |flag: &str| {
        tokens
            .windows(2)
            .find(|pair| pair[0] == flag)
            .map(|pair| pair[1])
    };
    let addr = addr.to_string();
    let on_tunnel = value_of("-i") == Some(interface) && value_of("-o") == Some(interface);
    let mentions = [value_of("-s"), value_of("-d")]
        .into_iter()
        .flatten()
        .any(|ip| strip_host_mask(ip) == addr);
    on_tunnel && mentions
}

#[async_trait]
impl<T: RuleTable> IsolationRules for ForwardRuleManager<T> {
    async fn allow(&self, a: Ipv4Addr, b: Ipv4Addr) -> Result<(), FleetError> {
        for (src, dst) in [(a, b), (b, a)] {
            self.table.apply(&self.insert_args(src, dst)).await?;
        }
        info!(%a, %b, interface = %self.interface, "Isolation pair installed.");
        Ok(())
    }

    async fn revoke(&self, addr: Ipv4Addr) -> Result<usize, FleetError> {
        let rules = self.table.list_forward().await?;
        let mut removed = 0;
        for rule in rules.iter().filter(|r| rule_references(r, &self.interface, addr)) {
            let mut args: Vec<String> = rule.split_whitespace().map(str::to_owned).collect();
            if args.first().map(String::as_str) != Some("-A") {
                continue;
            }
            args[0] = "-D".to_string();
            match self.table.apply(&args).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(%addr, rule = %rule, error = %e, "Rule delete failed, assuming it is already gone."),
            }
        }
        info!(%addr, removed, "Isolation rules revoked.");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRuleTable;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn matching_is_token_exact() {
        let rule = "-A FORWARD -s 10.8.0.50/32 -d 10.8.0.9/32 -i tun0 -o tun0 -j ACCEPT";
        assert!(!rule_references(rule, "tun0", ip("10.8.0.5")));
        assert!(rule_references(rule, "tun0", ip("10.8.0.50")));
        assert!(rule_references(rule, "tun0", ip("10.8.0.9")));
        assert!(!rule_references(rule, "tun1", ip("10.8.0.9")));
        assert!(!rule_references("-A FORWARD -s 10.8.0.9/32 -i tun0 -j ACCEPT", "tun0", ip("10.8.0.9")));
    }

    #[tokio::test]
    async fn allow_then_revoke_leaves_no_tunnel_rule() {
        let table = FakeRuleTable::default();
        table.seed("-A FORWARD -i eth0 -o eth0 -s 10.8.0.5/32 -j DROP");
        let manager = ForwardRuleManager::new(table.clone(), "tun0");

        manager.allow(ip("10.8.0.5"), ip("10.8.0.9")).await.unwrap();
        manager.allow(ip("10.8.0.50"), ip("10.8.0.51")).await.unwrap();
        assert_eq!(table.rules().len(), 5);

        assert_eq!(manager.revoke(ip("10.8.0.5")).await.unwrap(), 2);

        let remaining = table.rules();
        assert!(!remaining.iter().any(|r| rule_references(r, "tun0", ip("10.8.0.5"))));
        assert!(!remaining.iter().any(|r| rule_references(r, "tun0", ip("10.8.0.9"))));
        assert_eq!(remaining.len(), 3);
        assert_eq!(manager.revoke(ip("10.8.0.5")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn listing_failure_propagates() {
        let table = FakeRuleTable::default();
        table.fail_listing();
        let manager = ForwardRuleManager::new(table, "tun0");
        assert!(matches!(manager.revoke(ip("10.8.0.5")).await, Err(FleetError::RemoteFailure(_))));
    }
}
