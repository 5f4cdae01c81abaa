//! Error types for romforge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("position {position} is out of range (queue has {len} jobs)")]
    OutOfRange { position: usize, len: usize },

    #[error("job at position {position} belongs to another requester")]
    NotOwner { position: usize },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("build failed with exit code {exit_code:?}")]
    BuildFailed { exit_code: Option<i32> },

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
