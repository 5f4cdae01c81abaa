//! Message delivery with rate-limit backoff.

use romforge_config::NotifySettings;
use romforge_core::{ChannelId, Error};
use romforge_core::transport::{Attachment, Payload, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chunking::split_message;

/// What happened to a message handed to the [`Notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Given up on; the reason has been logged.
    Dropped,
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// Delivers messages to requester channels.
///
/// Delivery problems never propagate: a message is either delivered or
/// dropped with a log entry, so callers can ignore the result.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn Transport>,
    settings: NotifySettings,
}

impl Notifier {
    pub fn new(transport: Arc<dyn Transport>, settings: NotifySettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Send `text`, split into several messages if the transport needs it.
    ///
    /// Stops at the first piece that is dropped.
    pub async fn send_text(&self, channel: ChannelId, text: impl Into<String>) -> Delivery {
        let text = text.into();
        let Some(limit) = self.text_limit() else {
            return self.deliver(channel, &Payload::Text(text)).await;
        };

        for chunk in split_message(&text, limit) {
            if !self.deliver(channel, &Payload::Text(chunk)).await.is_delivered() {
                return Delivery::Dropped;
            }
        }
        Delivery::Delivered
    }

    /// Per-message text limit of the underlying transport.
    pub fn text_limit(&self) -> Option<usize> {
        self.transport.max_text_chars()
    }

    pub async fn send_document(&self, channel: ChannelId, attachment: Attachment) -> Delivery {
        self.deliver(channel, &Payload::Document(attachment)).await
    }

    /// Send `payload`, sleeping and retrying while the transport reports rate limiting.
    ///
    /// Gives up once more than `max_rate_limit_retries` retries have been made.
    pub async fn deliver(&self, channel: ChannelId, payload: &Payload) -> Delivery {
        let mut retries: u32 = 0;

        loop {
            let result = match payload {
                Payload::Text(text) => self.transport.send_text(channel, text).await,
                Payload::Document(attachment) => {
                    self.transport.send_binary(channel, attachment).await
                }
            };

            match result {
                Ok(()) => return Delivery::Delivered,
                Err(TransportError::RateLimited { retry_after }) => {
                    if retries > self.settings.max_rate_limit_retries {
                        let e = Error::DeliveryFailed(format!("rate limited {retries} times"));
                        warn!(
                            channel = %channel,
                            kind = payload.kind(),
                            error = %e,
                            "Giving up on message"
                        );
                        return Delivery::Dropped;
                    }

                    let wait = retry_after + self.settings.backoff_margin;
                    info!(
                        channel = %channel,
                        kind = payload.kind(),
                        retry_after_ms = millis(retry_after),
                        wait_ms = millis(wait),
                        "Rate limited; waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                    retries += 1;
                }
                Err(e) => {
                    warn!(
                        channel = %channel,
                        kind = payload.kind(),
                        transport = self.transport.name(),
                        error = %e,
                        "Send failed"
                    );
                    return Delivery::Dropped;
                }
            }
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
