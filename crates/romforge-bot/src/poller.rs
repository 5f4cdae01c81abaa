//! Long-polling loop for incoming updates.

use romforge_core::transport::TransportError;
use romforge_notify::telegram::TelegramTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::router::Router;

/// Pause after a failed poll before trying again.
const POLL_RETRY: Duration = Duration::from_secs(5);

/// Poll for updates and dispatch each message until Ctrl-C.
pub async fn run(transport: Arc<TelegramTransport>, router: Arc<Router>) -> anyhow::Result<()> {
    let mut offset: i64 = 0;
    info!("Listening for commands");

    loop {
        let updates = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
            updates = transport.get_updates(offset) => updates,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    if let Some(message) = update.message {
                        router.dispatch(message);
                    }
                }
            }
            Err(TransportError::RateLimited { retry_after }) => {
                let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                warn!(retry_after_ms, "Polling rate limited");
                tokio::time::sleep(retry_after).await;
            }
            Err(e) => {
                warn!(error = %e, "Polling failed");
                tokio::time::sleep(POLL_RETRY).await;
            }
        }
    }
}
