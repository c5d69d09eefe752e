//! Error taxonomy shared by the resolver chain, cache, coalescer, upstream
//! pool and policy engine.
//!
//! One flat enum per crate boundary rather than a single workspace-wide
//! error type, so callers match on the failures relevant to their layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation timed out")]
    Timeout,

    #[error("upstream network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("DNS protocol error: {0}")]
    Protocol(String),

    #[error("upstream returned rcode {0:?}")]
    UpstreamRcode(hickory_proto::op::ResponseCode),

    #[error("firewall backend unavailable: {0}")]
    BackendUnavailable(#[from] outway_firewall::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DNS proto error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Maps the error taxonomy onto a DNS response code: DNS clients
    /// observe RCODEs only, never the error taxonomy itself.
    pub fn to_rcode(&self) -> hickory_proto::op::ResponseCode {
        use hickory_proto::op::ResponseCode;
        match self {
            Error::InvalidInput(_) | Error::Protocol(_) => ResponseCode::FormErr,
            Error::UpstreamRcode(code) => *code,
            _ => ResponseCode::ServFail,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
