//! Outbound delivery for romforge.
//!
//! - [`Notifier`]: sends one message, absorbing rate limiting with bounded retries
//! - [`LogAggregator`]: keeps the running job's recent output and flushes tail snippets
//! - [`telegram::TelegramTransport`]: Bot API implementation of the delivery transport

pub mod chunking;
pub mod logs;
pub mod notifier;
pub mod telegram;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use logs::{JobScope, LogAggregator, LogBuffer, TailFlusher};
pub use notifier::{Delivery, Notifier};
