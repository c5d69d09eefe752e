//! Concrete firewall backends.

pub mod route;

#[cfg(target_os = "linux")]
pub mod iptables;
#[cfg(target_os = "linux")]
pub mod nftables;

#[cfg(target_os = "macos")]
pub mod pf;

use std::sync::Arc;

use which::which;

use crate::backend::FirewallBackend;
use crate::error::Result;

/// Probes for backend capability in order: nftables, iptables, pf, falling
/// back to the plain-route backend. An explicit `override_backend` (the
/// `firewall.backend` config key) skips detection.
pub fn detect(override_backend: Option<&str>) -> Result<Arc<dyn FirewallBackend>> {
    if let Some(name) = override_backend {
        return build_named(name);
    }

    #[cfg(target_os = "linux")]
    {
        if which("nft").is_ok() {
            return Ok(Arc::new(nftables::NfTablesBackend::new()?));
        }
        if which("iptables").is_ok() {
            return Ok(Arc::new(iptables::IptablesBackend::new()?));
        }
    }
    #[cfg(target_os = "macos")]
    {
        if which("pfctl").is_ok() {
            return Ok(Arc::new(pf::PfBackend::new()?));
        }
    }

    Ok(Arc::new(route::RouteBackend::new()?))
}

fn build_named(name: &str) -> Result<Arc<dyn FirewallBackend>> {
    match name {
        "route" => Ok(Arc::new(route::RouteBackend::new()?)),
        #[cfg(target_os = "linux")]
        "nftables" => Ok(Arc::new(nftables::NfTablesBackend::new()?)),
        #[cfg(target_os = "linux")]
        "iptables" => Ok(Arc::new(iptables::IptablesBackend::new()?)),
        #[cfg(target_os = "macos")]
        "pf" => Ok(Arc::new(pf::PfBackend::new()?)),
        other => Err(crate::error::Error::InvalidInput(format!("unsupported firewall backend: {other}"))),
    }
}
