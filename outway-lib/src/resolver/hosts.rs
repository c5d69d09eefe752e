//! Static hosts resolver. Compiles `cfg.hosts[]` into an exact-match map
//! plus a suffix-indexed structure.

use std::collections::HashMap;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{Name, RData, Record, RecordType};

use super::{QueryContext, Resolver, ResolverOutcome};
use crate::error::Result;
use crate::types::{HostsEntryConfig, Question, SourceTag};

struct CompiledEntry {
    a: Vec<std::net::Ipv4Addr>,
    aaaa: Vec<std::net::Ipv6Addr>,
    ttl: u32,
}

/// Exact names and `*.suffix` patterns compiled separately so lookup can
/// try exact match first, then the longest matching suffix.
struct Compiled {
    exact: HashMap<String, CompiledEntry>,
    suffixes: Vec<(String, CompiledEntry)>,
}

impl Compiled {
    fn build(entries: &[HostsEntryConfig]) -> Self {
        let mut exact = HashMap::new();
        let mut suffixes = Vec::new();
        for entry in entries {
            let compiled = CompiledEntry {
                a: entry.a.clone(),
                aaaa: entry.aaaa.clone(),
                ttl: entry.ttl,
            };
            if let Some(suffix) = entry.pattern.strip_prefix("*.") {
                suffixes.push((suffix.to_ascii_lowercase(), compiled));
            } else {
                exact.insert(Question::normalize_name(&entry.pattern), compiled);
            }
        }
        suffixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { exact, suffixes }
    }

    fn lookup(&self, name: &str) -> Option<&CompiledEntry> {
        if let Some(e) = self.exact.get(name) {
            return Some(e);
        }
        self.suffixes
            .iter()
            .find(|(suffix, _)| {
                name.len() > suffix.len() && name.ends_with(suffix.as_str()) && name.as_bytes()[name.len() - suffix.len() - 1] == b'.'
            })
            .map(|(_, e)| e)
    }
}

/// Reloadable via `ArcSwap` so a `SIGHUP` config reload recompiles the
/// exact/suffix tables without disturbing in-flight lookups.
pub struct HostsResolver {
    compiled: ArcSwap<Compiled>,
}

impl HostsResolver {
    pub fn new(entries: &[HostsEntryConfig]) -> Self {
        Self {
            compiled: ArcSwap::from_pointee(Compiled::build(entries)),
        }
    }

    pub fn reload(&self, entries: &[HostsEntryConfig]) {
        self.compiled.store(std::sync::Arc::new(Compiled::build(entries)));
    }
}

#[async_trait]
impl Resolver for HostsResolver {
    async fn resolve(&self, _ctx: &QueryContext, q: &Question) -> Result<Option<ResolverOutcome>> {
        let compiled = self.compiled.load();
        let Some(entry) = compiled.lookup(&q.name) else {
            return Ok(None);
        };

        let name = Name::from_ascii(&q.name).unwrap_or_else(|_| Name::root());
        let mut message = Message::new();
        message.set_authoritative(true);

        match q.qtype {
            RecordType::A if !entry.a.is_empty() => {
                for ip in &entry.a {
                    message.add_answer(Record::from_rdata(name.clone(), entry.ttl, RData::A(A(*ip))));
                }
            }
            RecordType::AAAA if !entry.aaaa.is_empty() => {
                for ip in &entry.aaaa {
                    message.add_answer(Record::from_rdata(name.clone(), entry.ttl, RData::AAAA(AAAA(*ip))));
                }
            }
            _ => return Ok(None),
        }

        Ok(Some(ResolverOutcome {
            message,
            source: SourceTag::Hosts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn ctx() -> QueryContext {
        QueryContext::new(Instant::now() + Duration::from_secs(1))
    }

    #[tokio::test]
    async fn exact_match_wins_over_suffix() {
        let entries = vec![
            HostsEntryConfig {
                pattern: "*.example.com".into(),
                a: vec!["10.0.0.1".parse().unwrap()],
                aaaa: vec![],
                ttl: 300,
            },
            HostsEntryConfig {
                pattern: "foo.example.com".into(),
                a: vec!["10.0.0.2".parse().unwrap()],
                aaaa: vec![],
                ttl: 300,
            },
        ];
        let resolver = HostsResolver::new(&entries);
        let q = Question::new("foo.example.com", RecordType::A);
        let outcome = resolver.resolve(&ctx(), &q).await.unwrap().unwrap();
        let RData::A(ip) = outcome.message.answers()[0].data() else {
            panic!("expected A record");
        };
        assert_eq!(ip.0, "10.0.0.2".parse::<std::net::Ipv4Addr>().unwrap());
    }

    #[tokio::test]
    async fn bare_suffix_does_not_match() {
        let entries = vec![HostsEntryConfig {
            pattern: "*.example.com".into(),
            a: vec!["10.0.0.1".parse().unwrap()],
            aaaa: vec![],
            ttl: 300,
        }];
        let resolver = HostsResolver::new(&entries);
        let q = Question::new("example.com", RecordType::A);
        assert!(resolver.resolve(&ctx(), &q).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reload_replaces_compiled_tables() {
        let resolver = HostsResolver::new(&[HostsEntryConfig {
            pattern: "foo.example.com".into(),
            a: vec!["10.0.0.1".parse().unwrap()],
            aaaa: vec![],
            ttl: 300,
        }]);
        let q = Question::new("bar.example.com", RecordType::A);
        assert!(resolver.resolve(&ctx(), &q).await.unwrap().is_none());

        resolver.reload(&[HostsEntryConfig {
            pattern: "bar.example.com".into(),
            a: vec!["10.0.0.9".parse().unwrap()],
            aaaa: vec![],
            ttl: 300,
        }]);
        assert!(resolver.resolve(&ctx(), &q).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unrelated_name_not_applicable() {
        let entries = vec![HostsEntryConfig {
            pattern: "foo.example.com".into(),
            a: vec!["10.0.0.1".parse().unwrap()],
            aaaa: vec![],
            ttl: 300,
        }];
        let resolver = HostsResolver::new(&entries);
        let q = Question::new("bar.example.com", RecordType::A);
        assert!(resolver.resolve(&ctx(), &q).await.unwrap().is_none());
    }
}
