//! Upstream pool: weighted selection, sequential failover, EWMA health.

pub mod https;
pub mod quic;
pub mod tcp;
pub mod tls;
pub mod transport;
pub mod udp;

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hickory_proto::op::Message;
use parking_lot::Mutex;
use rand::Rng;

use crate::config::UpstreamScheme;
use crate::error::{Error, Result};
use crate::types::{Health, Question, UpstreamConfig};
use transport::Transport;

const EWMA_ALPHA: f64 = 0.2;

fn health_from_u8(v: u8) -> Health {
    match v {
        0 => Health::Up,
        1 => Health::Degraded,
        _ => Health::Down,
    }
}

/// One pool member: a configured upstream plus its live transport client
/// and health bookkeeping. Health updates are lock-free atomics.
pub struct PoolMember {
    pub name: String,
    pub weight: u32,
    transport: Box<dyn Transport>,
    health: AtomicU8,
    error_ewma_bits: AtomicU64,
    down_since: Mutex<Option<Instant>>,
}

impl PoolMember {
    fn record_success(&self) {
        self.health.store(0, Ordering::Relaxed);
        *self.down_since.lock() = None;
        self.update_ewma(0.0);
    }

    fn record_failure(&self, cooldown: Duration) {
        self.update_ewma(1.0);
        let ewma = f64::from_bits(self.error_ewma_bits.load(Ordering::Relaxed));
        let new_health = if ewma > 0.5 {
            *self.down_since.lock() = Some(Instant::now());
            Health::Down
        } else {
            Health::Degraded
        };
        self.health.store(new_health as u8, Ordering::Relaxed);
        let _ = cooldown;
    }

    fn update_ewma(&self, sample: f64) {
        let prev = f64::from_bits(self.error_ewma_bits.load(Ordering::Relaxed));
        let next = EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * prev;
        self.error_ewma_bits.store(next.to_bits(), Ordering::Relaxed);
    }

    fn is_healthy(&self, cooldown: Duration) -> bool {
        match health_from_u8(self.health.load(Ordering::Relaxed)) {
            Health::Up | Health::Degraded => true,
            Health::Down => {
                let since = *self.down_since.lock();
                match since {
                    Some(t) => t.elapsed() >= cooldown,
                    None => true,
                }
            }
        }
    }
}

pub struct Pool {
    members: Vec<Arc<PoolMember>>,
    attempt_timeout: Duration,
    cooldown: Duration,
}

impl Pool {
    pub fn new(configs: &[UpstreamConfig], attempt_timeout: Duration, cooldown: Duration) -> Result<Self> {
        let mut members = Vec::with_capacity(configs.len());
        for cfg in configs {
            let transport = build_transport(&cfg.address)?;
            members.push(Arc::new(PoolMember {
                name: cfg.name.clone(),
                weight: cfg.weight,
                transport,
                health: AtomicU8::new(0),
                error_ewma_bits: AtomicU64::new(0),
                down_since: Mutex::new(None),
            }));
        }
        Ok(Self {
            members,
            attempt_timeout,
            cooldown,
        })
    }

    /// Weighted random draw without replacement over the healthy set; if
    /// none are healthy, falls back to the full list in configured order.
    fn candidate_order(&self) -> Vec<Arc<PoolMember>> {
        let healthy: Vec<Arc<PoolMember>> = self
            .members
            .iter()
            .filter(|m| m.is_healthy(self.cooldown))
            .cloned()
            .collect();

        let pool = if healthy.is_empty() { self.members.clone() } else { healthy };
        weighted_shuffle(pool)
    }

    pub async fn resolve(&self, q: &Question, deadline: Instant) -> Result<Message> {
        let order = self.candidate_order();
        let mut last_err: Option<Error> = None;

        for member in order {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(last_err.unwrap_or(Error::Timeout));
            }
            let attempt_timeout = remaining.min(self.attempt_timeout);

            match member.transport.resolve(q, attempt_timeout).await {
                Ok(message) => {
                    member.record_success();
                    return Ok(message);
                }
                Err(e) => {
                    member.record_failure(self.cooldown);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::NetworkUnavailable("no upstreams configured".into())))
    }
}

fn weighted_shuffle(mut pool: Vec<Arc<PoolMember>>) -> Vec<Arc<PoolMember>> {
    let mut rng = rand::rng();
    let mut ordered = Vec::with_capacity(pool.len());
    while !pool.is_empty() {
        let total: u64 = pool.iter().map(|m| m.weight as u64).sum();
        if total == 0 {
            ordered.extend(pool.drain(..));
            break;
        }
        let mut pick = rng.random_range(0..total);
        let mut idx = 0;
        for (i, m) in pool.iter().enumerate() {
            if pick < m.weight as u64 {
                idx = i;
                break;
            }
            pick -= m.weight as u64;
        }
        ordered.push(pool.remove(idx));
    }
    ordered
}

fn build_transport(address: &str) -> Result<Box<dyn Transport>> {
    let scheme = UpstreamScheme::parse(address).map_err(|e| Error::InvalidInput(e.to_string()))?;
    let without_scheme = address.splitn(2, "://").nth(1).unwrap_or(address);

    match scheme {
        UpstreamScheme::Udp => {
            let addr = resolve_host_port(without_scheme, 53)?;
            Ok(Box::new(udp::UdpTransport::new(addr)))
        }
        UpstreamScheme::Tcp => {
            let addr = resolve_host_port(without_scheme, 53)?;
            Ok(Box::new(tcp::TcpTransport::new(addr)))
        }
        UpstreamScheme::Tls => {
            let host = without_scheme.split(':').next().unwrap_or(without_scheme).to_string();
            let addr = resolve_host_port(without_scheme, 853)?;
            Ok(Box::new(tls::TlsTransport::new(addr, host)))
        }
        UpstreamScheme::Quic => {
            let host = without_scheme.split(':').next().unwrap_or(without_scheme).to_string();
            let addr = resolve_host_port(without_scheme, 853)?;
            Ok(Box::new(quic::QuicTransport::new(addr, host)))
        }
        UpstreamScheme::Https => Ok(Box::new(https::HttpsTransport::new(address.to_string())?)),
    }
}

fn resolve_host_port(host_port: &str, default_port: u16) -> Result<std::net::SocketAddr> {
    let candidate = if host_port.contains(':') {
        host_port.to_string()
    } else {
        format!("{host_port}:{default_port}")
    };
    candidate
        .to_socket_addrs()
        .map_err(|e| Error::InvalidInput(format!("resolving upstream address '{candidate}': {e}")))?
        .next()
        .ok_or_else(|| Error::InvalidInput(format!("no addresses for '{candidate}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_scheme_at_build_time() {
        let err = build_transport("ftp://example.com").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn udp_scheme_builds_transport() {
        let transport = build_transport("udp://1.1.1.1:53").unwrap();
        assert_eq!(transport.scheme(), "udp");
    }

    #[test]
    fn https_scheme_builds_transport() {
        let transport = build_transport("https://dns.example/dns-query").unwrap();
        assert_eq!(transport.scheme(), "https");
    }

    #[test]
    fn weighted_shuffle_preserves_all_members() {
        let members: Vec<Arc<PoolMember>> = (0..5)
            .map(|i| {
                Arc::new(PoolMember {
                    name: format!("m{i}"),
                    weight: (i + 1) as u32,
                    transport: Box::new(udp::UdpTransport::new("1.1.1.1:53".parse().unwrap())),
                    health: AtomicU8::new(0),
                    error_ewma_bits: AtomicU64::new(0),
                    down_since: Mutex::new(None),
                })
            })
            .collect();
        let shuffled = weighted_shuffle(members.clone());
        assert_eq!(shuffled.len(), members.len());
    }
}
