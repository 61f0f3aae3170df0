//! Error taxonomy for the transfer lifecycle.
//!
//! Library code returns these typed errors; the binary wraps them in
//! `anyhow` at the command layer.
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors returned to callers of the coordinator.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A start was requested while a transfer is in flight. Non-fatal.
    #[error("a transfer is already active")]
    AlreadyActive,

    #[error("invalid url {0:?}")]
    InvalidUrl(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures reported by the transport. The coordinator never retries these.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server responded with status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("staging io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no activity for {0:?}")]
    Stalled(Duration),

    #[error("transfer cancelled")]
    Cancelled,
}

/// Failures while moving a finished download into the destination directory.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create destination directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove existing file {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move {from:?} to {to:?}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
