//! Stateful mocks for firewall backend testing: state tracked directly
//! rather than call sequences, so tests assert on the system's state after
//! a lifecycle operation.

#![cfg(test)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::backend::{derive_tunnel_info, validate_mark_input, FirewallBackend, TunnelInfo};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct MockState {
    pub tunnels: HashMap<String, TunnelInfo>,
    pub marks: HashMap<(String, IpAddr), Instant>,
    pub policies_ensured: Vec<String>,
    pub fail_on: HashMap<String, String>,
}

impl MockState {
    fn check_fail(&self, op: &str) -> Result<()> {
        match self.fail_on.get(op) {
            Some(msg) => Err(Error::BackendFailure(msg.clone())),
            None => Ok(()),
        }
    }
}

pub struct MockBackend {
    pub state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn is_marked(&self, iface: &str, ip: IpAddr) -> bool {
        self.state
            .lock()
            .unwrap()
            .marks
            .get(&(iface.to_string(), ip))
            .map(|deadline| *deadline > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl FirewallBackend for MockBackend {
    async fn initialize_tunnels(&self, ifaces: &[String]) -> Result<HashMap<String, TunnelInfo>> {
        let mut state = self.state.lock().unwrap();
        state.check_fail("initialize_tunnels")?;
        for iface in ifaces {
            state.tunnels.entry(iface.clone()).or_insert_with(|| derive_tunnel_info(iface));
        }
        Ok(state.tunnels.clone())
    }

    async fn ensure_policy(&self, iface: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check_fail("ensure_policy")?;
        if !state.policies_ensured.contains(&iface.to_string()) {
            state.policies_ensured.push(iface.to_string());
        }
        Ok(())
    }

    async fn mark_ip(&self, iface: &str, ip: IpAddr, ttl: Duration) -> Result<()> {
        validate_mark_input(iface)?;
        let mut state = self.state.lock().unwrap();
        state.check_fail("mark_ip")?;
        let deadline = Instant::now() + ttl;
        let key = (iface.to_string(), ip);
        let existing = state.marks.get(&key).copied();
        let new_deadline = match existing {
            Some(current) => current.max(deadline),
            None => deadline,
        };
        state.marks.insert(key, new_deadline);
        Ok(())
    }

    async fn flush_runtime(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check_fail("flush_runtime")?;
        state.marks.clear();
        Ok(())
    }

    async fn cleanup_all(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check_fail("cleanup_all")?;
        state.marks.clear();
        state.tunnels.clear();
        state.policies_ensured.clear();
        Ok(())
    }

    async fn get_tunnel_info(&self, iface: &str) -> Option<TunnelInfo> {
        self.state.lock().unwrap().tunnels.get(iface).copied()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_ip_rejects_unsafe_interface() {
        let backend = MockBackend::new();
        let err = backend
            .mark_ip("bad iface", "10.0.0.1".parse().unwrap(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn duplicate_mark_extends_deadline_to_max() {
        let backend = MockBackend::new();
        let ip = "10.0.0.5".parse().unwrap();
        backend.mark_ip("wan1", ip, Duration::from_secs(10)).await.unwrap();
        backend.mark_ip("wan1", ip, Duration::from_secs(60)).await.unwrap();
        let deadline = *backend.state.lock().unwrap().marks.get(&("wan1".to_string(), ip)).unwrap();
        assert!(deadline >= Instant::now() + Duration::from_secs(59));
    }

    #[tokio::test]
    async fn cleanup_all_clears_everything() {
        let backend = MockBackend::new();
        backend.initialize_tunnels(&["wan1".into()]).await.unwrap();
        backend.mark_ip("wan1", "10.0.0.1".parse().unwrap(), Duration::from_secs(30)).await.unwrap();
        backend.cleanup_all().await.unwrap();
        assert!(backend.get_tunnel_info("wan1").await.is_none());
        assert!(!backend.is_marked("wan1", "10.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn fail_on_injects_backend_failure() {
        let backend = MockBackend::new();
        backend.state.lock().unwrap().fail_on.insert("mark_ip".into(), "kernel unreachable".into());
        let err = backend
            .mark_ip("wan1", "10.0.0.1".parse().unwrap(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendFailure(_)));
    }
}
