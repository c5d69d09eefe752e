//! iptables backend: one chain `OUTWAY_MARK` in `mangle/PREROUTING` with
//! an `ipset`-backed set per interface; fwmark set by
//! `-j MARK --set-mark <m>`.
//!
//! Chain/rule management goes through the `iptables` crate; `ipset` has no
//! equivalent crate in this stack, so per-interface sets are managed by
//! shelling out to the `ipset` binary via `shell::ShellCommandExt`.

#![cfg(target_os = "linux")]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;

use crate::backend::{derive_tunnel_info, validate_mark_input, FirewallBackend, TunnelInfo};
use crate::error::{Error, Result};
use crate::netlink_ops::{NetlinkOps, RealNetlinkOps, RuleSpec};
use crate::shell::ShellCommandExt;

const CHAIN_NAME: &str = "OUTWAY_MARK";
const TABLE: &str = "mangle";

fn set_name(iface: &str) -> String {
    format!("outway_{iface}")
}

pub struct IptablesBackend {
    inner: iptables::IPTables,
    netlink: Arc<dyn NetlinkOps>,
    tunnels: Mutex<HashMap<String, TunnelInfo>>,
    policies_ensured: Mutex<std::collections::HashSet<String>>,
}

impl IptablesBackend {
    pub fn new() -> Result<Self> {
        let inner = iptables::new(false).map_err(|e| Error::BackendFailure(e.to_string()))?;
        Ok(Self {
            inner,
            netlink: Arc::new(RealNetlinkOps::new()?),
            tunnels: Mutex::new(HashMap::new()),
            policies_ensured: Mutex::new(std::collections::HashSet::new()),
        })
    }

    fn ensure_chain(&self) -> Result<()> {
        let exists = self.inner.chain_exists(TABLE, CHAIN_NAME).map_err(|e| Error::BackendFailure(e.to_string()))?;
        if !exists {
            self.inner.new_chain(TABLE, CHAIN_NAME).map_err(|e| Error::BackendFailure(e.to_string()))?;
            self.inner
                .append(TABLE, "PREROUTING", &format!("-j {CHAIN_NAME}"))
                .map_err(|e| Error::BackendFailure(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl FirewallBackend for IptablesBackend {
    async fn initialize_tunnels(&self, ifaces: &[String]) -> Result<HashMap<String, TunnelInfo>> {
        self.ensure_chain()?;
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

    async fn ensure_policy(&self, iface: &str) -> Result<()> {
        if self.policies_ensured.lock().contains(iface) {
            return Ok(());
        }
        let fwmark = self
            .tunnels
            .lock()
            .get(iface)
            .map(|t| t.fwmark)
            .ok_or_else(|| Error::UnknownInterface(iface.to_string()))?;

        Command::new("ipset")
            .args(["create", &set_name(iface), "hash:ip", "timeout", "0"])
            .run()
            .await
            .or_else(|_| Ok::<(), Error>(()))?;

        self.inner
            .append(
                TABLE,
                CHAIN_NAME,
                &format!("-m set --match-set {} dst -j MARK --set-mark {fwmark}", set_name(iface)),
            )
            .map_err(|e| Error::BackendFailure(e.to_string()))?;

        self.policies_ensured.lock().insert(iface.to_string());
        Ok(())
    }

    async fn mark_ip(&self, iface: &str, ip: IpAddr, ttl: Duration) -> Result<()> {
        validate_mark_input(iface)?;
        self.ensure_policy(iface).await?;

        Command::new("ipset")
            .args([
                "add",
                &set_name(iface),
                &ip.to_string(),
                "timeout",
                &ttl.as_secs().to_string(),
                "-exist",
            ])
            .run()
            .await
    }

    async fn flush_runtime(&self) -> Result<()> {
        for iface in self.policies_ensured.lock().iter() {
            let _ = Command::new("ipset").args(["flush", &set_name(iface)]).run().await;
        }
        let _ = self.inner.flush_chain(TABLE, CHAIN_NAME);
        Ok(())
    }

    async fn cleanup_all(&self) -> Result<()> {
        self.flush_runtime().await?;
        for iface in self.policies_ensured.lock().drain() {
            let _ = Command::new("ipset").args(["destroy", &set_name(&iface)]).run().await;
        }
        let _ = self.inner.delete(TABLE, "PREROUTING", &format!("-j {CHAIN_NAME}"));
        let _ = self.inner.delete_chain(TABLE, CHAIN_NAME);
        self.tunnels.lock().clear();
        Ok(())
    }

    async fn get_tunnel_info(&self, iface: &str) -> Option<TunnelInfo> {
        self.tunnels.lock().get(iface).copied()
    }

    fn name(&self) -> &'static str {
        "iptables"
    }
}
