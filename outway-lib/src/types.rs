//! Core data model shared across the resolver chain, cache, pool and
//! policy engine.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use hickory_proto::rr::RecordType;
use serde::{Deserialize, Serialize};

/// `(name: lowercased FQDN without trailing dot, qtype, qclass: IN)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
}

impl Question {
    /// Normalizes a raw query name into the internal FQDN form: lowercase,
    /// no trailing dot.
    pub fn normalize_name(raw: &str) -> String {
        raw.trim_end_matches('.').to_ascii_lowercase()
    }

    pub fn new(raw_name: &str, qtype: RecordType) -> Self {
        Self {
            name: Self::normalize_name(raw_name),
            qtype,
        }
    }
}

/// One cached answer. `stored_at` and `effective_ttl` jointly determine
/// expiry; invariant: `stored_at + effective_ttl > now` for every entry a
/// `Get` returns.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub message: hickory_proto::op::Message,
    pub stored_at: Instant,
    pub effective_ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.stored_at + self.effective_ttl <= now
    }

    /// Remaining TTL clamped to zero, never negative.
    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        let deadline = self.stored_at + self.effective_ttl;
        deadline.saturating_duration_since(now)
    }
}

/// Health state tracked per upstream by the pool's EWMA-driven prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Up,
    Degraded,
    Down,
}

/// One configured upstream resolver endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// `(name, description, via, pin_ttl, patterns)`. At most one rule group
/// matches any FQDN; first configured match wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleGroupConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub via: String,
    #[serde(default)]
    pub pin_ttl: bool,
    pub patterns: Vec<String>,
}

/// Static hosts entry, compiled by the hosts resolver at config load time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostsEntryConfig {
    pub pattern: String,
    #[serde(default)]
    pub a: Vec<std::net::Ipv4Addr>,
    #[serde(default)]
    pub aaaa: Vec<std::net::Ipv6Addr>,
    #[serde(default = "default_hosts_ttl")]
    pub ttl: u32,
}

fn default_hosts_ttl() -> u32 {
    300
}

/// Read-only input to the LAN resolver; lifecycle owned by an external
/// DHCP lease reader.
#[derive(Debug, Clone)]
pub struct Lease {
    pub hostname: String,
    pub hostname_normalized: String,
    pub ip: IpAddr,
    pub mac: String,
    pub expires_at: Instant,
}

impl Lease {
    pub fn new(hostname: String, ip: IpAddr, mac: String, expires_at: Instant) -> Self {
        let hostname_normalized = Question::normalize_name(&hostname);
        Self {
            hostname,
            hostname_normalized,
            ip,
            mac,
            expires_at,
        }
    }
}

/// Tag identifying which resolver chain step produced a response, used for
/// the observability ring buffer (`QueryOutcome`) and by the policy engine,
/// which runs after *any* successful resolver in the chain (not just
/// upstream-sourced answers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    Hosts,
    Lan,
    Cache,
    Upstream,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Hosts => "hosts",
            SourceTag::Lan => "lan",
            SourceTag::Cache => "cache",
            SourceTag::Upstream => "upstream",
        }
    }
}

/// Outcome of a single query, emitted once the chain returns, for the
/// query history ring buffer and the metrics registry.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub fqdn: String,
    pub qtype: RecordType,
    pub source: Option<SourceTag>,
    pub rcode: hickory_proto::op::ResponseCode,
    pub answer_count: usize,
    pub elapsed: Duration,
}
