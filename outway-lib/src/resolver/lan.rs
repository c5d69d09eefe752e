//! LAN/local-zone resolver: synthesizes answers from DHCP leases and
//! returns authoritative NXDOMAIN for unknown names inside a local zone.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{Name, RData, Record, RecordType};

use super::{QueryContext, Resolver, ResolverOutcome};
use crate::error::Result;
use crate::types::{Lease, Question, SourceTag};

/// One source of local zone names. Each variant owns its own parser so the
/// resolver never leaks platform-specific types; new formats are added as
/// new variants, not new resolver implementations.
pub enum ZoneSource {
    /// Generic `option X 'Y'` / `list X 'Y'` reader, matching OpenWrt UCI's
    /// line shape closely enough to pull `domain`/`local` stanzas out of
    /// `/etc/config/dhcp`.
    Uci,
    /// `/etc/resolv.conf`'s `domain`/`search` directives.
    ResolvConf,
    /// Stubbed: no D-Bus wiring to `systemd-resolved` yet.
    SystemdResolved,
    /// Stubbed: no mDNS/avahi integration yet.
    Avahi,
}

impl ZoneSource {
    pub fn detect(&self, content: &str) -> Vec<String> {
        match self {
            ZoneSource::Uci => detect_uci(content),
            ZoneSource::ResolvConf => detect_resolv_conf(content),
            ZoneSource::SystemdResolved => {
                tracing::debug!("systemd-resolved zone detection not implemented, returning empty set");
                Vec::new()
            }
            ZoneSource::Avahi => {
                tracing::debug!("avahi zone detection not implemented, returning empty set");
                Vec::new()
            }
        }
    }
}

fn detect_uci(content: &str) -> Vec<String> {
    let mut zones = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if !(line.starts_with("option domain") || line.starts_with("list domain")) {
            continue;
        }
        if let Some(value) = line.split('\'').nth(1) {
            zones.push(Question::normalize_name(value));
        }
    }
    zones
}

fn detect_resolv_conf(content: &str) -> Vec<String> {
    let mut zones = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        let rest = line.strip_prefix("domain").or_else(|| line.strip_prefix("search"));
        if let Some(rest) = rest {
            for token in rest.split_whitespace() {
                zones.push(Question::normalize_name(token));
            }
        }
    }
    zones
}

/// Lease table plus detected zones. Queries ending in a local zone or
/// matching a bare lease hostname are synthesized; local-zone names with no
/// lease get an authoritative NXDOMAIN.
pub struct LanResolver {
    zones: Vec<String>,
    leases: RwLock<HashMap<String, Lease>>,
}

impl LanResolver {
    pub fn new(zones: Vec<String>) -> Self {
        Self {
            zones,
            leases: RwLock::new(HashMap::new()),
        }
    }

    pub fn update_lease(&self, lease: Lease) {
        self.leases.write().unwrap().insert(lease.hostname_normalized.clone(), lease);
    }

    pub fn remove_lease(&self, hostname_normalized: &str) {
        self.leases.write().unwrap().remove(hostname_normalized);
    }

    fn is_local_zone(&self, name: &str) -> bool {
        self.zones.iter().any(|z| name == z || name.ends_with(&format!(".{z}")))
    }
}

#[async_trait]
impl Resolver for LanResolver {
    async fn resolve(&self, _ctx: &QueryContext, q: &Question) -> Result<Option<ResolverOutcome>> {
        let leases = self.leases.read().unwrap();
        let lease = leases.get(&q.name);

        let local = self.is_local_zone(&q.name);
        if lease.is_none() && !local {
            return Ok(None);
        }

        let dns_name = Name::from_ascii(&q.name).unwrap_or_else(|_| Name::root());
        let mut message = Message::new();
        message.set_authoritative(true);

        match lease {
            Some(lease) => {
                match (q.qtype, lease.ip) {
                    (RecordType::A, IpAddr::V4(ip)) => {
                        message.add_answer(Record::from_rdata(dns_name, 60, RData::A(A(ip))));
                    }
                    (RecordType::AAAA, IpAddr::V6(ip)) => {
                        message.add_answer(Record::from_rdata(dns_name, 60, RData::AAAA(AAAA(ip))));
                    }
                    _ => {}
                }
                Ok(Some(ResolverOutcome {
                    message,
                    source: SourceTag::Lan,
                }))
            }
            None => {
                message.set_response_code(ResponseCode::NXDomain);
                Ok(Some(ResolverOutcome {
                    message,
                    source: SourceTag::Lan,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn ctx() -> QueryContext {
        QueryContext::new(Instant::now() + Duration::from_secs(1))
    }

    #[test]
    fn uci_parses_domain_stanzas() {
        let content = "config dnsmasq\n\toption domain 'lan'\n";
        assert_eq!(ZoneSource::Uci.detect(content), vec!["lan".to_string()]);
    }

    #[test]
    fn resolv_conf_parses_search_domains() {
        let content = "nameserver 192.0.2.1\nsearch lan corp.example\n";
        assert_eq!(
            ZoneSource::ResolvConf.detect(content),
            vec!["lan".to_string(), "corp.example".to_string()]
        );
    }

    #[tokio::test]
    async fn lease_hostname_resolves() {
        let resolver = LanResolver::new(vec!["lan".into()]);
        resolver.update_lease(Lease::new(
            "laptop".into(),
            "192.168.1.5".parse().unwrap(),
            "aa:bb:cc:dd:ee:ff".into(),
            Instant::now() + Duration::from_secs(3600),
        ));
        let q = Question::new("laptop", RecordType::A);
        let outcome = resolver.resolve(&ctx(), &q).await.unwrap().unwrap();
        assert_eq!(outcome.message.answers().len(), 1);
    }

    #[tokio::test]
    async fn local_zone_without_lease_is_nxdomain() {
        let resolver = LanResolver::new(vec!["lan".into()]);
        let q = Question::new("missing.lan", RecordType::A);
        let outcome = resolver.resolve(&ctx(), &q).await.unwrap().unwrap();
        assert_eq!(outcome.message.response_code(), ResponseCode::NXDomain);
    }

    #[tokio::test]
    async fn non_local_name_not_applicable() {
        let resolver = LanResolver::new(vec!["lan".into()]);
        let q = Question::new("example.com", RecordType::A);
        assert!(resolver.resolve(&ctx(), &q).await.unwrap().is_none());
    }
}
