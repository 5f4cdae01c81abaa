//! Telegram Bot API transport.
//!
//! Text goes through `sendMessage`, artifacts through a multipart
//! `sendDocument` upload. Inbound commands are read with long-polling
//! `getUpdates`.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use crate::chunking::TELEGRAM_MAX_MESSAGE_CHARS;
use romforge_config::BotSettings;
use romforge_core::ChannelId;
use romforge_core::transport::{Attachment, Transport, TransportError};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Wait used when the server rate limits without saying for how long.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Extra time on top of the long-poll timeout before the HTTP request gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
    token: String,
    poll_timeout: Duration,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>, settings: &BotSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            poll_timeout: settings.poll_timeout,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        let request = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(self.poll_timeout + POLL_GRACE)
            .json(&body);

        let data = self.call("getUpdates", request).await?;
        let result = data.get("result").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(result)
            .map_err(|e| TransportError::Rejected(format!("malformed getUpdates result: {e}")))
    }

    async fn call(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Rejected(e.without_url().to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(method, status = %status, "Telegram API response");
        classify(status, &body)
    }
}

/// Map a Bot API response onto the transport error model.
///
/// HTTP 429 and `error_code: 429` are both rate limits; the wait comes from
/// `parameters.retry_after`.
pub fn classify(status: StatusCode, body: &str) -> Result<Value, TransportError> {
    let parsed = serde_json::from_str::<Value>(body).ok();

    let error_code = parsed
        .as_ref()
        .and_then(|data| data.get("error_code"))
        .and_then(Value::as_i64);
    if status == StatusCode::TOO_MANY_REQUESTS || error_code == Some(429) {
        let retry_after = parsed
            .as_ref()
            .and_then(|data| data.pointer("/parameters/retry_after"))
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(TransportError::RateLimited { retry_after });
    }

    let Some(data) = parsed else {
        return Err(TransportError::Rejected(format!(
            "status={status}, unparseable body: {body}"
        )));
    };

    let ok = data.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !status.is_success() || !ok {
        let description = data
            .get("description")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(body);
        return Err(TransportError::Rejected(format!(
            "status={status}, {description}"
        )));
    }

    Ok(data)
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn max_text_chars(&self) -> Option<usize> {
        Some(TELEGRAM_MAX_MESSAGE_CHARS)
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<(), TransportError> {
        let body = json!({
            "chat_id": channel.get(),
            "text": text,
        });
        let request = self.client.post(self.method_url("sendMessage")).json(&body);
        self.call("sendMessage", request).await.map(|_| ())
    }

    async fn send_binary(
        &self,
        channel: ChannelId,
        attachment: &Attachment,
    ) -> Result<(), TransportError> {
        let bytes = tokio::fs::read(&attachment.path).await?;
        let part = Part::bytes(bytes).file_name(attachment.file_name.clone());
        let form = Form::new()
            .text("chat_id", channel.get().to_string())
            .part("document", part);
        let request = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form);
        self.call("sendDocument", request).await.map(|_| ())
    }
}
