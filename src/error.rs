//! Error types for vitalstream

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

pub type Result<T> = std::result::Result<T, MonitorError>;

/// A wire message or record line that could not be turned into a measurement.
///
/// Always recovered locally: the offending input is logged and dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expected 4 comma-separated fields, found {found}")]
    FieldCount { found: usize },

    #[error("invalid patient id {0:?}")]
    PatientId(String),

    #[error("invalid timestamp {0:?}")]
    Timestamp(String),

    #[error("invalid measurement value {0:?}")]
    Value(String),

    #[error("empty measurement kind")]
    EmptyKind,

    #[error("malformed record line, missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("failed to connect to {addr} after {attempts} attempt(s): {source}")]
    Connect {
        addr: String,
        attempts: u32,
        source: io::Error,
    },

    #[error("connection closed")]
    Closed,

    #[error("send to {peer} timed out")]
    Timeout { peer: SocketAddr },

    #[error("line codec error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

/// Top-level error for everything the crate can surface to a caller.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
