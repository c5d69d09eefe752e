//! Error taxonomy for the firewall/route backend.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("this functionality is not available on this platform")]
    NotAvailable,

    #[error("backend primitive failed: {0}")]
    BackendFailure(String),

    #[error("no tunnel registered for interface {0}")]
    UnknownInterface(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(target_os = "linux")]
    #[error("rtnetlink error: {0}")]
    Rtnetlink(#[from] rtnetlink::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
