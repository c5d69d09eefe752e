//! YAML configuration loading and validation: a plain `read(path)` function
//! returning a typed `Config`, a dedicated `Error` enum, and an
//! `ENV_VAR`/`DEFAULT_PATH` pair consumed by the CLI's `clap` defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{HostsEntryConfig, RuleGroupConfig, UpstreamConfig};

pub const DEFAULT_PATH: &str = "/etc/outway/config.yaml";
pub const ENV_VAR: &str = "OUTWAY_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration file not found at {0}")]
    NotFound(std::path::PathBuf),
    #[error("IO error reading configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_udp")]
    pub udp: String,
    #[serde(default = "default_listen_tcp")]
    pub tcp: String,
}

fn default_listen_udp() -> String {
    "0.0.0.0:53".to_string()
}
fn default_listen_tcp() -> String {
    "0.0.0.0:53".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            udp: default_listen_udp(),
            tcp: default_listen_tcp(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_min_ttl")]
    pub min_ttl_seconds: u32,
    #[serde(default = "default_max_ttl")]
    pub max_ttl_seconds: u32,
}

fn default_true() -> bool {
    true
}
fn default_cache_max_entries() -> usize {
    10_000
}
fn default_min_ttl() -> u32 {
    0
}
fn default_max_ttl() -> u32 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_max_entries(),
            min_ttl_seconds: default_min_ttl(),
            max_ttl_seconds: default_max_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_history_max_entries")]
    pub max_entries: usize,
}

fn default_history_max_entries() -> usize {
    1_000
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: default_history_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_http_listen")]
    pub listen: String,
    #[serde(default, with = "humantime_serde::option")]
    pub read_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub write_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub idle_timeout: Option<Duration>,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

fn default_http_listen() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_max_header_bytes() -> usize {
    1 << 20
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_http_listen(),
            read_timeout: None,
            write_timeout: None,
            idle_timeout: None,
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamPoolConfig {
    #[serde(default = "default_attempt_timeout", with = "humantime_serde")]
    pub attempt_timeout: Duration,
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

impl Default for UpstreamPoolConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: default_attempt_timeout(),
            cooldown: default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    #[serde(default = "default_min_mark_ttl", with = "humantime_serde")]
    pub min_mark_ttl: Duration,
}

fn default_min_mark_ttl() -> Duration {
    Duration::from_secs(30)
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_mark_ttl: default_min_mark_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FirewallConfig {
    /// Overrides auto-detection (probing in order: route, nftables,
    /// iptables, pf). One of `route`, `nftables`, `iptables`, `pf`.
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub state_file: Option<std::path::PathBuf>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            backend: None,
            state_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
    #[serde(default)]
    pub rule_groups: Vec<RuleGroupConfig>,
    #[serde(default)]
    pub hosts: Vec<HostsEntryConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default = "default_log_level")]
    pub log: LogConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub upstream: UpstreamPoolConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Duration,
    #[serde(default = "default_shutdown_deadline", with = "humantime_serde")]
    pub shutdown_deadline: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_level_str")]
    pub level: String,
}

fn default_level_str() -> String {
    "info".to_string()
}

fn default_log_level() -> LogConfig {
    LogConfig {
        level: default_level_str(),
    }
}

fn default_app_name() -> String {
    "outway".to_string()
}
fn default_query_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_shutdown_deadline() -> Duration {
    Duration::from_secs(5)
}

/// Supported upstream URL schemes. Parsed eagerly at config
/// load time so an unsupported scheme fails startup with `InvalidInput`
/// rather than at first query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
    Udp,
    Tcp,
    Tls,
    Quic,
    Https,
}

impl UpstreamScheme {
    pub fn parse(url: &str) -> Result<Self, Error> {
        let scheme = url
            .split("://")
            .next()
            .filter(|_| url.contains("://"))
            .ok_or_else(|| Error::Invalid(format!("upstream address missing scheme: {url}")))?;
        match scheme {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            "tls" | "dot" => Ok(Self::Tls),
            "quic" | "doq" => Ok(Self::Quic),
            "https" => Ok(Self::Https),
            other => Err(Error::Invalid(format!("unsupported upstream scheme: {other}"))),
        }
    }
}

impl Config {
    /// Validates cross-field invariants not expressible via serde alone.
    /// Fatal at startup; reload callers decide for themselves
    /// whether to keep the previous generation on failure.
    pub fn validate(&self) -> Result<(), Error> {
        for up in &self.upstreams {
            if up.weight == 0 {
                return Err(Error::Invalid(format!("upstream '{}' has weight 0", up.name)));
            }
            UpstreamScheme::parse(&up.address)?;
        }
        for group in &self.rule_groups {
            if group.patterns.is_empty() {
                return Err(Error::Invalid(format!("rule group '{}' has no patterns", group.name)));
            }
        }
        if self.cache.min_ttl_seconds > self.cache.max_ttl_seconds {
            return Err(Error::Invalid(
                "cache.min_ttl_seconds must be <= cache.max_ttl_seconds".into(),
            ));
        }
        Ok(())
    }
}

pub async fn read(path: &Path) -> Result<Config, Error> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.to_path_buf())
        } else {
            Error::Io(e)
        }
    })?;
    let config: Config = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
upstreams:
  - name: cloudflare
    address: "udp://1.1.1.1:53"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.app_name, "outway");
        assert_eq!(cfg.cache.min_ttl_seconds, 0);
        assert_eq!(cfg.cache.max_ttl_seconds, 86_400);
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let yaml = r#"
upstreams:
  - name: bad
    address: "ftp://example.com"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(cfg.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn rejects_zero_weight() {
        let yaml = r#"
upstreams:
  - name: bad
    address: "udp://1.1.1.1:53"
    weight: 0
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(cfg.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn rejects_inverted_ttl_clamp() {
        let yaml = r#"
cache:
  min_ttl_seconds: 100
  max_ttl_seconds: 10
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(cfg.validate(), Err(Error::Invalid(_))));
    }
}
