use std::net::SocketAddr;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use outway_firewall::backends;
use outway_lib::cache::Cache;
use outway_lib::coalescer::Coalescer;
use outway_lib::config::{self, Config};
use outway_lib::logging::ReloadHandle;
use outway_lib::resolver::cache_resolver::CacheResolver;
use outway_lib::resolver::hosts::HostsResolver;
use outway_lib::resolver::lan::{LanResolver, ZoneSource};
use outway_lib::resolver::upstream_resolver::UpstreamResolver;
use outway_lib::resolver::Resolver;
use outway_lib::upstream::Pool;
use outway_lib::{DnsServer, Handler, History, PolicyEngine};

mod cli;
mod signals;

use cli::Command;
use signals::Signals;

const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

// Avoid musl's default allocator due to degraded performance under
// concurrent small allocations, same tradeoff a long-running network
// daemon always faces.
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    let cli = cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error building tokio runtime: {e}");
            process::exit(exitcode::OSERR);
        }
    };

    let exit = runtime.block_on(dispatch(cli.command));
    if exit != exitcode::OK {
        process::exit(exit);
    }
}

async fn dispatch(command: Command) -> exitcode::ExitCode {
    match command {
        Command::Run { config } => run(&config).await,
        Command::Cleanup { config } => cleanup(&config).await,
        Command::SelfUpdate { prerelease } => self_update(prerelease),
    }
}

async fn run(config_path: &Path) -> exitcode::ExitCode {
    let cfg = match config::read(config_path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return exitcode::CONFIG;
        }
    };

    let log_handle = outway_lib::logging::init(&cfg.log.level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting {}", env!("CARGO_PKG_NAME"));

    let backend = match backends::detect(cfg.firewall.backend.as_deref()) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(error = %e, "failed to select firewall backend");
            return exitcode::OSERR;
        }
    };
    tracing::info!(backend = backend.name(), "firewall backend selected");

    let ifaces = rule_group_interfaces(&cfg);
    if let Err(e) = backend.initialize_tunnels(&ifaces).await {
        tracing::error!(error = %e, "failed to initialize tunnel bookkeeping");
        return exitcode::OSERR;
    }
    for iface in &ifaces {
        if let Err(e) = backend.ensure_policy(iface).await {
            tracing::error!(error = %e, iface, "failed to install base firewall policy");
            return exitcode::OSERR;
        }
    }

    let hosts = Arc::new(HostsResolver::new(&cfg.hosts));
    let lan = Arc::new(LanResolver::new(detect_local_zones().await));
    let cache = Arc::new(Cache::new(
        cfg.cache.max_entries,
        Duration::from_secs(cfg.cache.min_ttl_seconds as u64),
        Duration::from_secs(cfg.cache.max_ttl_seconds as u64),
    ));
    let coalescer = Arc::new(Coalescer::new());
    let pool = match Pool::new(&cfg.upstreams, cfg.upstream.attempt_timeout, cfg.upstream.cooldown) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream pool");
            return exitcode::CONFIG;
        }
    };

    let chain: Vec<Box<dyn Resolver>> = vec![
        Box::new(hosts.clone()),
        Box::new(lan.clone()),
        Box::new(CacheResolver::new(cache.clone())),
        Box::new(UpstreamResolver::new(pool.clone(), coalescer.clone(), cache.clone())),
    ];

    let policy = Arc::new(PolicyEngine::new(&cfg.rule_groups, cfg.policy.min_mark_ttl, backend.clone()));
    let history = Arc::new(History::new(cfg.history.enabled, cfg.history.max_entries));
    let handler = Handler::new(chain, policy.clone(), history, cfg.query_timeout);

    let udp_addr: SocketAddr = match cfg.listen.udp.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, addr = %cfg.listen.udp, "invalid listen.udp address");
            return exitcode::CONFIG;
        }
    };
    let tcp_addr: SocketAddr = match cfg.listen.tcp.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, addr = %cfg.listen.tcp, "invalid listen.tcp address");
            return exitcode::CONFIG;
        }
    };

    let server = match DnsServer::bind(handler, udp_addr, tcp_addr, TCP_IDLE_TIMEOUT).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, %udp_addr, %tcp_addr, "failed to bind DNS listeners");
            return exitcode::OSERR;
        }
    };

    let signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return exitcode::OSERR;
        }
    };

    serve(server, signals, config_path, policy, hosts, log_handle, cfg.shutdown_deadline).await
}

async fn serve(
    server: DnsServer,
    mut signals: Signals,
    config_path: &Path,
    policy: Arc<PolicyEngine>,
    hosts: Arc<HostsResolver>,
    log_handle: ReloadHandle,
    shutdown_deadline: Duration,
) -> exitcode::ExitCode {
    tracing::info!("enter listening mode");
    let done = server.block_until_done();
    tokio::pin!(done);

    let mut shutting_down = false;
    loop {
        tokio::select! {
            result = &mut done => {
                return match result {
                    Ok(()) => exitcode::OK,
                    Err(e) if shutting_down => {
                        tracing::warn!(error = %e, "dns server stopped while draining");
                        exitcode::OK
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "dns server exited unexpectedly");
                        exitcode::SOFTWARE
                    }
                };
            }
            _ = signals.interrupt.recv(), if !shutting_down => {
                tracing::info!("received SIGINT, winding down within the shutdown deadline");
                shutting_down = true;
            }
            _ = signals.terminate.recv(), if !shutting_down => {
                tracing::info!("received SIGTERM, winding down within the shutdown deadline");
                shutting_down = true;
            }
            _ = signals.hangup.recv() => {
                reload(config_path, &policy, &hosts, &log_handle).await;
            }
            _ = tokio::time::sleep(shutdown_deadline), if shutting_down => {
                tracing::warn!(?shutdown_deadline, "shutdown deadline elapsed with queries still in flight");
                return exitcode::OK;
            }
        }
    }
}

async fn reload(config_path: &Path, policy: &PolicyEngine, hosts: &HostsResolver, log_handle: &ReloadHandle) {
    tracing::info!("received SIGHUP, reloading configuration");
    let cfg = match config::read(config_path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to reload configuration, keeping previous generation");
            return;
        }
    };

    policy.reload(&cfg.rule_groups, cfg.policy.min_mark_ttl);
    hosts.reload(&cfg.hosts);
    if let Err(e) = outway_lib::logging::set_level(log_handle, &cfg.log.level) {
        tracing::warn!(error = %e, "failed to apply reloaded log level");
    }
    tracing::info!("configuration reloaded");
}

async fn cleanup(config_path: &Path) -> exitcode::ExitCode {
    let cfg = match config::read(config_path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return exitcode::CONFIG;
        }
    };

    outway_lib::logging::init(&cfg.log.level);

    let backend = match backends::detect(cfg.firewall.backend.as_deref()) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(error = %e, "failed to select firewall backend");
            return exitcode::OSERR;
        }
    };

    match backend.cleanup_all().await {
        Ok(()) => {
            tracing::info!(backend = backend.name(), "removed all installed firewall/route state");
            exitcode::OK
        }
        Err(e) => {
            tracing::error!(error = %e, "cleanup failed");
            exitcode::OSERR
        }
    }
}

fn self_update(prerelease: bool) -> exitcode::ExitCode {
    tracing::warn!(prerelease, "self-update is not implemented");
    exitcode::UNAVAILABLE
}

fn rule_group_interfaces(cfg: &Config) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    for group in &cfg.rule_groups {
        seen.insert(group.via.clone());
    }
    seen.into_iter().collect()
}

async fn detect_local_zones() -> Vec<String> {
    let mut zones = Vec::new();
    if let Ok(content) = tokio::fs::read_to_string("/etc/resolv.conf").await {
        zones.extend(ZoneSource::ResolvConf.detect(&content));
    }
    if let Ok(content) = tokio::fs::read_to_string("/etc/config/dhcp").await {
        zones.extend(ZoneSource::Uci.detect(&content));
    }
    zones.sort();
    zones.dedup();
    zones
}

#[cfg(test)]
mod tests {
    use super::*;
    use outway_lib::types::RuleGroupConfig;

    fn group(name: &str, via: &str) -> RuleGroupConfig {
        RuleGroupConfig {
            name: name.to_string(),
            description: String::new(),
            via: via.to_string(),
            pin_ttl: false,
            patterns: vec!["*.example.com".to_string()],
        }
    }

    #[test]
    fn rule_group_interfaces_dedups_and_sorts() {
        let yaml = r#"
upstreams:
  - name: cloudflare
    address: "udp://1.1.1.1:53"
"#;
        let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();
        cfg.rule_groups = vec![group("work", "wg0"), group("streaming", "eth1"), group("backup", "wg0")];

        let ifaces = rule_group_interfaces(&cfg);
        assert_eq!(ifaces, vec!["eth1".to_string(), "wg0".to_string()]);
    }

    #[test]
    fn rule_group_interfaces_empty_when_no_groups() {
        let yaml = r#"
upstreams:
  - name: cloudflare
    address: "udp://1.1.1.1:53"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(rule_group_interfaces(&cfg).is_empty());
    }
}
