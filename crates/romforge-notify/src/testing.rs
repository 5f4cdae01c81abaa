//! In-memory transport for tests.

use async_trait::async_trait;
use romforge_core::ChannelId;
use romforge_core::transport::{Attachment, Payload, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Records every message it is asked to send.
///
/// Responses can be scripted with [`RecordingTransport::push_response`]; once
/// the script is exhausted every send succeeds.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ChannelId, Payload)>>,
    responses: Mutex<VecDeque<Result<(), TransportError>>>,
    attempts: Mutex<usize>,
    text_limit: Option<usize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject text longer than `max_chars`, the way the Bot API does.
    pub fn with_text_limit(max_chars: usize) -> Self {
        Self {
            text_limit: Some(max_chars),
            ..Self::default()
        }
    }

    /// Queue the result of the next send attempt.
    pub fn push_response(&self, response: Result<(), TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Every send attempt, including failed ones.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// Successfully delivered messages, in order.
    pub fn sent(&self) -> Vec<(ChannelId, Payload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_for(&self, channel: ChannelId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(c, payload)| match payload {
                Payload::Text(text) if c == channel => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn documents_for(&self, channel: ChannelId) -> Vec<Attachment> {
        self.sent()
            .into_iter()
            .filter_map(|(c, payload)| match payload {
                Payload::Document(attachment) if c == channel => Some(attachment),
                _ => None,
            })
            .collect()
    }

    fn record(&self, channel: ChannelId, payload: Payload) -> Result<(), TransportError> {
        *self.attempts.lock().unwrap() += 1;
        let response = self.responses.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if response.is_ok() {
            self.sent.lock().unwrap().push((channel, payload));
        }
        response
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn max_text_chars(&self) -> Option<usize> {
        self.text_limit
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<(), TransportError> {
        if let Some(limit) = self.text_limit {
            if text.chars().count() > limit {
                *self.attempts.lock().unwrap() += 1;
                return Err(TransportError::Rejected("message is too long".to_string()));
            }
        }
        self.record(channel, Payload::Text(text.to_string()))
    }

    async fn send_binary(
        &self,
        channel: ChannelId,
        attachment: &Attachment,
    ) -> Result<(), TransportError> {
        self.record(channel, Payload::Document(attachment.clone()))
    }
}
