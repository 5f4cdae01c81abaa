//! Delivery transport trait.
//!
//! A transport sends one text message or one file to a channel. It reports
//! rate limiting distinctly so callers can back off and retry.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::ChannelId;

/// A file to upload as a binary attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub file_name: String,
}

impl Attachment {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());
        Self { path, file_name }
    }
}

/// A single outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Document(Attachment),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Document(_) => "document",
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The server asked us to wait before sending again.
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for delivery transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name of this transport.
    fn name(&self) -> &'static str;

    /// Longest text, in characters, a single `send_text` may carry.
    fn max_text_chars(&self) -> Option<usize> {
        None
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<(), TransportError>;

    async fn send_binary(
        &self,
        channel: ChannelId,
        attachment: &Attachment,
    ) -> Result<(), TransportError>;
}
