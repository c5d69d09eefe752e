//! Domain-to-route policy engine: matches resolved answers against
//! configured rule groups and installs time-bounded firewall marks before
//! the response reaches the client.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use hickory_proto::op::Message;
use hickory_proto::rr::{RData, RecordType};
use outway_firewall::FirewallBackend;

use crate::types::RuleGroupConfig;

struct CompiledPattern {
    exact: Option<String>,
    suffix: Option<String>,
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Self {
        match pattern.strip_prefix("*.") {
            Some(suffix) => Self {
                exact: None,
                suffix: Some(suffix.to_ascii_lowercase()),
            },
            None => Self {
                exact: Some(pattern.to_ascii_lowercase()),
                suffix: None,
            },
        }
    }

    fn matches(&self, fqdn: &str) -> bool {
        match (&self.exact, &self.suffix) {
            (Some(exact), _) => fqdn == exact,
            (_, Some(suffix)) => fqdn.ends_with(suffix) && fqdn.len() > suffix.len() && fqdn.as_bytes()[fqdn.len() - suffix.len() - 1] == b'.',
            _ => false,
        }
    }
}

struct CompiledGroup {
    via: String,
    pin_ttl: bool,
    patterns: Vec<CompiledPattern>,
}

impl CompiledGroup {
    fn matches(&self, fqdn: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(fqdn))
    }
}

struct Compiled {
    groups: Vec<CompiledGroup>,
    min_mark_ttl: Duration,
}

impl Compiled {
    fn build(configs: &[RuleGroupConfig], min_mark_ttl: Duration) -> Self {
        let groups = configs
            .iter()
            .map(|g| CompiledGroup {
                via: g.via.clone(),
                pin_ttl: g.pin_ttl,
                patterns: g.patterns.iter().map(|p| CompiledPattern::compile(p)).collect(),
            })
            .collect();
        Self { groups, min_mark_ttl }
    }

    fn find_group(&self, fqdn: &str) -> Option<&CompiledGroup> {
        self.groups.iter().find(|g| g.matches(fqdn))
    }
}

/// Rule groups and the mark-TTL floor form one reloadable generation,
/// swapped atomically on `SIGHUP` so a query never observes a half-applied
/// configuration.
pub struct PolicyEngine {
    compiled: ArcSwap<Compiled>,
    backend: Arc<dyn FirewallBackend>,
}

impl PolicyEngine {
    pub fn new(configs: &[RuleGroupConfig], min_mark_ttl: Duration, backend: Arc<dyn FirewallBackend>) -> Self {
        Self {
            compiled: ArcSwap::from_pointee(Compiled::build(configs, min_mark_ttl)),
            backend,
        }
    }

    /// Recompiles rule groups from a reloaded configuration and swaps them
    /// in atomically; in-flight `apply()` calls keep running against
    /// whichever generation they already loaded.
    pub fn reload(&self, configs: &[RuleGroupConfig], min_mark_ttl: Duration) {
        self.compiled.store(Arc::new(Compiled::build(configs, min_mark_ttl)));
    }

    /// Runs the matched rule group's mark action over every A/AAAA answer,
    /// logging (but never surfacing) firewall failures so the DNS response
    /// always reaches the client.
    pub async fn apply(&self, fqdn: &str, response: &Message) {
        let compiled = self.compiled.load();
        let Some(group) = compiled.find_group(fqdn) else {
            return;
        };

        for answer in response.answers() {
            if !matches!(answer.record_type(), RecordType::A | RecordType::AAAA) {
                continue;
            }
            let Some(ip) = rdata_ip(answer.data()) else {
                continue;
            };

            let ttl = if group.pin_ttl {
                Duration::from_secs(answer.ttl() as u64)
            } else {
                Duration::from_secs(answer.ttl() as u64).max(compiled.min_mark_ttl)
            };

            if let Err(e) = self.backend.mark_ip(&group.via, ip, ttl).await {
                tracing::warn!(fqdn, via = %group.via, %ip, error = %e, "failed to install policy mark");
                metrics_mark_failure();
            }
        }
    }
}

fn rdata_ip(rdata: &RData) -> Option<IpAddr> {
    match rdata {
        RData::A(a) => Some(IpAddr::V4(a.0)),
        RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
        _ => None,
    }
}

fn metrics_mark_failure() {
    crate::metrics::global().mark_failures.increment();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, Record};
    use outway_firewall::TunnelInfo;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        marks: Mutex<Vec<(String, IpAddr, Duration)>>,
        fail: bool,
    }

    #[async_trait]
    impl FirewallBackend for RecordingBackend {
        async fn initialize_tunnels(&self, _ifaces: &[String]) -> outway_firewall::Result<HashMap<String, TunnelInfo>> {
            Ok(HashMap::new())
        }
        async fn ensure_policy(&self, _iface: &str) -> outway_firewall::Result<()> {
            Ok(())
        }
        async fn mark_ip(&self, iface: &str, ip: IpAddr, ttl: Duration) -> outway_firewall::Result<()> {
            if self.fail {
                return Err(outway_firewall::Error::BackendFailure("injected".into()));
            }
            self.marks.lock().unwrap().push((iface.to_string(), ip, ttl));
            Ok(())
        }
        async fn flush_runtime(&self) -> outway_firewall::Result<()> {
            Ok(())
        }
        async fn cleanup_all(&self) -> outway_firewall::Result<()> {
            Ok(())
        }
        async fn get_tunnel_info(&self, _iface: &str) -> Option<TunnelInfo> {
            None
        }
        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn response_with_a(name: &str, ttl: u32, ip: std::net::Ipv4Addr) -> Message {
        let mut message = Message::new();
        let dns_name = Name::from_ascii(name).unwrap();
        message.add_answer(Record::from_rdata(dns_name, ttl, RData::A(A(ip))));
        message
    }

    fn group(via: &str, pin_ttl: bool, patterns: &[&str]) -> RuleGroupConfig {
        RuleGroupConfig {
            name: "g".into(),
            description: String::new(),
            via: via.to_string(),
            pin_ttl,
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn exact_pattern_matches_only_full_fqdn() {
        let backend = Arc::new(RecordingBackend::default());
        let engine = PolicyEngine::new(&[group("wan1", false, &["example.com"])], Duration::from_secs(30), backend.clone());
        let response = response_with_a("example.com", 60, "93.184.216.34".parse().unwrap());
        engine.apply("example.com", &response).await;
        assert_eq!(backend.marks.lock().unwrap().len(), 1);

        backend.marks.lock().unwrap().clear();
        engine.apply("sub.example.com", &response).await;
        assert!(backend.marks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wildcard_pattern_matches_subdomains_not_bare_suffix() {
        let backend = Arc::new(RecordingBackend::default());
        let engine = PolicyEngine::new(&[group("wan1", false, &["*.example.com"])], Duration::from_secs(30), backend.clone());
        let response = response_with_a("a.example.com", 60, "93.184.216.34".parse().unwrap());
        engine.apply("a.example.com", &response).await;
        assert_eq!(backend.marks.lock().unwrap().len(), 1);

        backend.marks.lock().unwrap().clear();
        engine.apply("example.com", &response).await;
        assert!(backend.marks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_matching_group_wins() {
        let backend = Arc::new(RecordingBackend::default());
        let engine = PolicyEngine::new(
            &[group("wan1", false, &["*.example.com"]), group("wan2", false, &["a.example.com"])],
            Duration::from_secs(30),
            backend.clone(),
        );
        let response = response_with_a("a.example.com", 60, "93.184.216.34".parse().unwrap());
        engine.apply("a.example.com", &response).await;
        let marks = backend.marks.lock().unwrap();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].0, "wan1");
    }

    #[tokio::test]
    async fn min_mark_ttl_floors_short_rr_ttl() {
        let backend = Arc::new(RecordingBackend::default());
        let engine = PolicyEngine::new(&[group("wan1", false, &["example.com"])], Duration::from_secs(30), backend.clone());
        let response = response_with_a("example.com", 5, "93.184.216.34".parse().unwrap());
        engine.apply("example.com", &response).await;
        assert_eq!(backend.marks.lock().unwrap()[0].2, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn pinned_ttl_uses_rr_ttl_even_below_floor() {
        let backend = Arc::new(RecordingBackend::default());
        let engine = PolicyEngine::new(&[group("wan1", true, &["example.com"])], Duration::from_secs(30), backend.clone());
        let response = response_with_a("example.com", 5, "93.184.216.34".parse().unwrap());
        engine.apply("example.com", &response).await;
        assert_eq!(backend.marks.lock().unwrap()[0].2, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn reload_swaps_rule_groups_atomically() {
        let backend = Arc::new(RecordingBackend::default());
        let engine = PolicyEngine::new(&[group("wan1", false, &["example.com"])], Duration::from_secs(30), backend.clone());
        let response = response_with_a("other.com", 60, "93.184.216.34".parse().unwrap());

        engine.apply("other.com", &response).await;
        assert!(backend.marks.lock().unwrap().is_empty());

        engine.reload(&[group("wan2", false, &["other.com"])], Duration::from_secs(10));
        engine.apply("other.com", &response).await;
        let marks = backend.marks.lock().unwrap();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].0, "wan2");
    }

    #[tokio::test]
    async fn backend_failure_does_not_panic() {
        let backend = Arc::new(RecordingBackend { fail: true, ..Default::default() });
        let engine = PolicyEngine::new(&[group("wan1", false, &["example.com"])], Duration::from_secs(30), backend);
        let response = response_with_a("example.com", 60, "93.184.216.34".parse().unwrap());
        engine.apply("example.com", &response).await;
    }
}
