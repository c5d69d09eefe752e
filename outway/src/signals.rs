//! `SIGINT`/`SIGTERM`/`SIGHUP` listeners built on `tokio::signal::unix`.

use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct Signals {
    pub interrupt: Signal,
    pub terminate: Signal,
    pub hangup: Signal,
}

impl Signals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }
}
