//! Firewall backend contract.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::name_safety::is_safe_iface;

/// `(iface, table_id, fwmark, priority)`, all three non-`iface` fields
/// equal to each other and derived from a hash of `iface` restricted to
/// `[30000, 30999]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelInfo {
    pub table_id: u32,
    pub fwmark: u32,
    pub priority: u32,
}

pub const TUNNEL_RANGE_START: u32 = 30_000;
pub const TUNNEL_RANGE_END: u32 = 30_999;

pub fn derive_tunnel_info(iface: &str) -> TunnelInfo {
    let mut hasher = DefaultHasher::new();
    iface.hash(&mut hasher);
    let span = TUNNEL_RANGE_END - TUNNEL_RANGE_START + 1;
    let value = TUNNEL_RANGE_START + (hasher.finish() as u32) % span;
    TunnelInfo {
        table_id: value,
        fwmark: value,
        priority: value,
    }
}

/// A polymorphic firewall/route backend: `route`, `nftables`,
/// `iptables`, or `pf`. All public methods funnel through a single serial
/// actor per backend instance.
#[async_trait]
pub trait FirewallBackend: Send + Sync {
    async fn initialize_tunnels(&self, ifaces: &[String]) -> Result<std::collections::HashMap<String, TunnelInfo>>;
    async fn ensure_policy(&self, iface: &str) -> Result<()>;
    async fn mark_ip(&self, iface: &str, ip: IpAddr, ttl: Duration) -> Result<()>;
    async fn flush_runtime(&self) -> Result<()>;
    async fn cleanup_all(&self) -> Result<()>;
    async fn get_tunnel_info(&self, iface: &str) -> Option<TunnelInfo>;

    fn name(&self) -> &'static str;
}

/// Shared input validation every backend's `mark_ip` performs before
/// touching kernel state.
pub fn validate_mark_input(iface: &str) -> Result<()> {
    if !is_safe_iface(iface) {
        return Err(crate::error::Error::InvalidInput(format!("unsafe interface name: {iface}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_tunnel_info_is_in_range_and_consistent() {
        let info = derive_tunnel_info("wan1");
        assert!(info.table_id >= TUNNEL_RANGE_START && info.table_id <= TUNNEL_RANGE_END);
        assert_eq!(info.table_id, info.fwmark);
        assert_eq!(info.fwmark, info.priority);
    }

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(derive_tunnel_info("wan1"), derive_tunnel_info("wan1"));
    }

    #[test]
    fn distinct_interfaces_usually_differ() {
        assert_ne!(derive_tunnel_info("wan1"), derive_tunnel_info("wan2"));
    }
}
