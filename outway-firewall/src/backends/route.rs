//! Plain-route backend: no firewall, just `ip route`/`ip rule` via
//! netlink.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{derive_tunnel_info, validate_mark_input, FirewallBackend, TunnelInfo};
use crate::error::{Error, Result};
use crate::scheduler::{ExpiryHandler, Scheduler};

#[cfg(target_os = "linux")]
use crate::netlink_ops::{NetlinkOps, RealNetlinkOps, RouteSpec, RuleSpec};

/// Reserved protocol label so cleanup never touches routes it did not
/// install itself.
pub const ROUTE_PROTOCOL_TAG: u8 = 0xF0;
pub const ROUTE_METRIC: u32 = 999;

struct Installed {
    iface: String,
    table_id: u32,
}

pub struct RouteBackend {
    #[cfg(target_os = "linux")]
    netlink: Arc<dyn NetlinkOps>,
    tunnels: Mutex<HashMap<String, TunnelInfo>>,
    installed: Mutex<HashMap<(String, IpAddr), Installed>>,
    scheduler: Arc<Scheduler>,
}

impl RouteBackend {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            Ok(Self {
                netlink: Arc::new(RealNetlinkOps::new()?),
                tunnels: Mutex::new(HashMap::new()),
                installed: Mutex::new(HashMap::new()),
                scheduler: Scheduler::new(),
            })
        }
        #[cfg(not(target_os = "linux"))]
        {
            Err(Error::NotAvailable)
        }
    }

    #[cfg(test)]
    pub fn with_netlink(netlink: Arc<dyn NetlinkOps>) -> Self {
        Self {
            #[cfg(target_os = "linux")]
            netlink,
            tunnels: Mutex::new(HashMap::new()),
            installed: Mutex::new(HashMap::new()),
            scheduler: Scheduler::new(),
        }
    }

    /// Spawns the TTL expiry worker. Runs until `cancel` fires.
    #[cfg(target_os = "linux")]
    pub fn spawn_expiry(&self, cancel: tokio_util::sync::CancellationToken) {
        let scheduler = self.scheduler.clone();
        let handler = Arc::new(RouteExpiry {
            netlink: self.netlink.clone(),
        });
        tokio::spawn(scheduler.run(handler, |_, _| None, cancel));
    }
}

#[cfg(target_os = "linux")]
struct RouteExpiry {
    netlink: Arc<dyn NetlinkOps>,
}

#[cfg(target_os = "linux")]
#[async_trait]
impl ExpiryHandler for RouteExpiry {
    async fn expire(&self, iface: &str, ip: IpAddr) -> std::result::Result<(), String> {
        let spec = RouteSpec {
            destination: ip,
            prefix_len: if ip.is_ipv4() { 32 } else { 128 },
            table_id: 0,
            oif_index: 0,
        };
        let _ = iface;
        self.netlink.route_del(&spec).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl FirewallBackend for RouteBackend {
    #[cfg(target_os = "linux")]
    async fn initialize_tunnels(&self, ifaces: &[String]) -> Result<HashMap<String, TunnelInfo>> {
        let mut tunnels = self.tunnels.lock();
        for iface in ifaces {
            let info = *tunnels.entry(iface.clone()).or_insert_with(|| derive_tunnel_info(iface));
            self.netlink
                .rule_add(&RuleSpec {
                    fw_mark: info.fwmark,
                    table_id: info.table_id,
                    priority: info.priority,
                })
                .await?;
        }
        Ok(tunnels.clone())
    }

    #[cfg(not(target_os = "linux"))]
    async fn initialize_tunnels(&self, _ifaces: &[String]) -> Result<HashMap<String, TunnelInfo>> {
        Err(Error::NotAvailable)
    }

    async fn ensure_policy(&self, _iface: &str) -> Result<()> {
        // No additional scaffolding required: a table already exists once
        // `initialize_tunnels` has run.
        Ok(())
    }

    #[cfg(target_os = "linux")]
    async fn mark_ip(&self, iface: &str, ip: IpAddr, ttl: Duration) -> Result<()> {
        validate_mark_input(iface)?;
        let table_id = self
            .tunnels
            .lock()
            .get(iface)
            .map(|t| t.table_id)
            .ok_or_else(|| Error::UnknownInterface(iface.to_string()))?;
        let ifindex = self.netlink.resolve_ifindex(iface).await?;

        let spec = RouteSpec {
            destination: ip,
            prefix_len: if ip.is_ipv4() { 32 } else { 128 },
            table_id,
            oif_index: ifindex,
        };
        self.netlink.route_add(&spec).await?;

        self.installed.lock().insert(
            (iface.to_string(), ip),
            Installed {
                iface: iface.to_string(),
                table_id,
            },
        );
        self.scheduler.schedule(iface.to_string(), ip, Instant::now() + ttl);
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    async fn mark_ip(&self, _iface: &str, _ip: IpAddr, _ttl: Duration) -> Result<()> {
        Err(Error::NotAvailable)
    }

    async fn flush_runtime(&self) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            let entries: Vec<((String, IpAddr), Installed)> = self.installed.lock().drain().collect();
            for ((_, ip), installed) in entries {
                let spec = RouteSpec {
                    destination: ip,
                    prefix_len: if ip.is_ipv4() { 32 } else { 128 },
                    table_id: installed.table_id,
                    oif_index: 0,
                };
                let _ = self.netlink.route_del(&spec).await;
            }
        }
        Ok(())
    }

    async fn cleanup_all(&self) -> Result<()> {
        self.flush_runtime().await?;
        self.tunnels.lock().clear();
        Ok(())
    }

    async fn get_tunnel_info(&self, iface: &str) -> Option<TunnelInfo> {
        self.tunnels.lock().get(iface).copied()
    }

    fn name(&self) -> &'static str {
        "route"
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::netlink_ops::LinkInfo;

    struct StubNetlink;

    #[async_trait]
    impl NetlinkOps for StubNetlink {
        async fn route_add(&self, _route: &RouteSpec) -> Result<()> {
            Ok(())
        }
        async fn route_del(&self, _route: &RouteSpec) -> Result<()> {
            Ok(())
        }
        async fn route_list(&self, _table_id: Option<u32>) -> Result<Vec<RouteSpec>> {
            Ok(Vec::new())
        }
        async fn rule_add(&self, _rule: &RuleSpec) -> Result<()> {
            Ok(())
        }
        async fn rule_del(&self, _rule: &RuleSpec) -> Result<()> {
            Ok(())
        }
        async fn rule_list(&self) -> Result<Vec<RuleSpec>> {
            Ok(Vec::new())
        }
        async fn link_list(&self) -> Result<Vec<LinkInfo>> {
            Ok(Vec::new())
        }
        async fn resolve_ifindex(&self, _iface: &str) -> Result<u32> {
            Ok(2)
        }
    }

    #[tokio::test]
    async fn mark_ip_rejects_unknown_interface() {
        let backend = RouteBackend::with_netlink(Arc::new(StubNetlink));
        let err = backend
            .mark_ip("wan1", "10.0.0.1".parse().unwrap(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownInterface(_)));
    }

    #[tokio::test]
    async fn mark_ip_succeeds_after_initialize() {
        let backend = RouteBackend::with_netlink(Arc::new(StubNetlink));
        backend.initialize_tunnels(&["wan1".into()]).await.unwrap();
        backend
            .mark_ip("wan1", "10.0.0.1".parse().unwrap(), Duration::from_secs(30))
            .await
            .unwrap();
    }
}
