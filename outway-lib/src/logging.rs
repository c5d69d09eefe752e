//! Structured logging setup: an `EnvFilter` seeded from the environment
//! (falling back to a configured default) that can be swapped out later via
//! `reload::Handle` without restarting the process, so `SIGHUP`-driven
//! config reload can also change `log.level`.

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{reload, EnvFilter};
use tracing_subscriber::{fmt, prelude::*};

pub type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

const ENV_VAR_LOG_LEVEL: &str = "OUTWAY_LOG_LEVEL";

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initializes the global subscriber, writing to stderr. `level` is the
/// `log.level` config key's initial value; `RUST_LOG`/`OUTWAY_LOG_LEVEL`
/// override it if set.
pub fn init(level: &str) -> ReloadHandle {
    let level = std::env::var(ENV_VAR_LOG_LEVEL).unwrap_or_else(|_| level.to_string());
    let (filter_layer, handle) = reload::Layer::new(filter_for(&level));
    let fmt_layer = fmt::layer().with_writer(BoxMakeWriter::new(std::io::stderr())).with_ansi(true);
    tracing_subscriber::registry().with(filter_layer).with(fmt_layer).init();
    handle
}

/// Swaps the active `EnvFilter` for one built from `level`. `RUST_LOG`/
/// `OUTWAY_LOG_LEVEL` still take precedence if set, matching `init`.
pub fn set_level(handle: &ReloadHandle, level: &str) -> Result<(), reload::Error> {
    let level = std::env::var(ENV_VAR_LOG_LEVEL).unwrap_or_else(|_| level.to_string());
    handle.reload(filter_for(&level))
}
