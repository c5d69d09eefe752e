//! pf backend (macOS): anchor `outway/<iface>` and a table
//! `outway_<iface>` updated via `pfctl -a outway/<iface> -t outway_<iface>
//! -T add/delete`; policy route via `route-to (iface)` inside the anchor.

#![cfg(target_os = "macos")]

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;

use crate::backend::{derive_tunnel_info, validate_mark_input, FirewallBackend, TunnelInfo};
use crate::error::{Error, Result};
use crate::scheduler::{ExpiryHandler, Scheduler};
use crate::shell::ShellCommandExt;
use std::sync::Arc;

fn anchor(iface: &str) -> String {
    format!("outway/{iface}")
}
fn table(iface: &str) -> String {
    format!("outway_{iface}")
}

pub struct PfBackend {
    tunnels: Mutex<HashMap<String, TunnelInfo>>,
    policies_ensured: Mutex<std::collections::HashSet<String>>,
    scheduler: Arc<Scheduler>,
}

impl PfBackend {
    pub fn new() -> Result<Self> {
        Ok(Self {
            tunnels: Mutex::new(HashMap::new()),
            policies_ensured: Mutex::new(std::collections::HashSet::new()),
            scheduler: Scheduler::new(),
        })
    }

    pub fn spawn_expiry(&self, cancel: tokio_util::sync::CancellationToken) {
        let scheduler = self.scheduler.clone();
        tokio::spawn(scheduler.run(Arc::new(PfExpiry), |_, _| None, cancel));
    }
}

struct PfExpiry;

#[async_trait]
impl ExpiryHandler for PfExpiry {
    async fn expire(&self, iface: &str, ip: IpAddr) -> std::result::Result<(), String> {
        Command::new("pfctl")
            .args(["-a", &anchor(iface), "-t", &table(iface), "-T", "delete", &ip.to_string()])
            .run()
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl FirewallBackend for PfBackend {
    async fn initialize_tunnels(&self, ifaces: &[String]) -> Result<HashMap<String, TunnelInfo>> {
        let mut tunnels = self.tunnels.lock();
        for iface in ifaces {
            tunnels.entry(iface.clone()).or_insert_with(|| derive_tunnel_info(iface));
        }
        Ok(tunnels.clone())
    }

    async fn ensure_policy(&self, iface: &str) -> Result<()> {
        if self.policies_ensured.lock().contains(iface) {
            return Ok(());
        }
        if !self.tunnels.lock().contains_key(iface) {
            return Err(Error::UnknownInterface(iface.to_string()));
        }

        Command::new("pfctl")
            .args(["-a", &anchor(iface), "-t", &table(iface), "-T", "show"])
            .run()
            .await
            .or_else(|_| {
                // Table doesn't exist yet; pf creates it implicitly on
                // first `-T add`, so nothing further is required here.
                Ok::<(), Error>(())
            })?;

        let rules = format!(
            "table <{}> persist\npass out route-to ({iface}) from any to <{}>\n",
            table(iface),
            table(iface)
        );
        tokio::io::AsyncWriteExt::write_all(
            &mut Command::new("pfctl")
                .args(["-a", &anchor(iface), "-f", "-"])
                .stdin(std::process::Stdio::piped())
                .spawn()
                .map_err(Error::Io)?
                .stdin
                .take()
                .ok_or_else(|| Error::BackendFailure("no stdin handle".into()))?,
            rules.as_bytes(),
        )
        .await
        .map_err(Error::Io)?;

        self.policies_ensured.lock().insert(iface.to_string());
        Ok(())
    }

    async fn mark_ip(&self, iface: &str, ip: IpAddr, ttl: Duration) -> Result<()> {
        validate_mark_input(iface)?;
        self.ensure_policy(iface).await?;

        Command::new("pfctl")
            .args(["-a", &anchor(iface), "-t", &table(iface), "-T", "add", &ip.to_string()])
            .run()
            .await?;

        self.scheduler.schedule(iface.to_string(), ip, std::time::Instant::now() + ttl);
        Ok(())
    }

    async fn flush_runtime(&self) -> Result<()> {
        for iface in self.policies_ensured.lock().iter() {
            let _ = Command::new("pfctl").args(["-a", &anchor(iface), "-t", &table(iface), "-T", "flush"]).run().await;
        }
        Ok(())
    }

    async fn cleanup_all(&self) -> Result<()> {
        self.flush_runtime().await?;
        for iface in self.policies_ensured.lock().drain() {
            let _ = Command::new("pfctl").args(["-a", &anchor(&iface), "-F", "all"]).run().await;
        }
        self.tunnels.lock().clear();
        Ok(())
    }

    async fn get_tunnel_info(&self, iface: &str) -> Option<TunnelInfo> {
        self.tunnels.lock().get(iface).copied()
    }

    fn name(&self) -> &'static str {
        "pf"
    }
}
