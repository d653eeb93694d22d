//! Error types for shardkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[cfg(feature = "sled-backend")]
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    // === Routing Errors ===
    #[error("Cluster has no nodes")]
    EmptyCluster,

    #[error("Shard not found: {0}")]
    ShardNotFound(usize),

    #[error("Insufficient replicas: need {needed}, have {available}")]
    InsufficientReplicas { needed: usize, available: usize },

    // === Quorum Errors ===
    #[error("Invalid quorum: ack={ack}, from={from}")]
    InvalidQuorum { ack: usize, from: usize },

    #[error("Worker pool saturated")]
    Overloaded,

    // === Request Errors ===
    #[error("{0}")]
    BadRequest(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Config Errors ===
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::BadRequest(_)
            | Error::InvalidQuorum { .. }
            | Error::ShardNotFound(_)
            | Error::InsufficientReplicas { .. } => StatusCode::BAD_REQUEST,
            Error::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}
