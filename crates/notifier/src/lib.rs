//! Notification delivery.
//!
//! [`Messenger`] is the seam between the pipeline and a chat transport;
//! [`telegram::TelegramMessenger`] delivers through the Telegram Bot API.

pub mod telegram;

use std::future::Future;

use trackwatch_common::error::AppResult;

pub use telegram::TelegramMessenger;

/// Markup flavour of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    /// The light HTML subset chat clients render (`b`, `i`, `a`, `pre`).
    #[default]
    HtmlSubset,
}

/// A chat transport. One call sends one message; no retries.
pub trait Messenger: Send + Sync + 'static {
    fn send(
        &self,
        target: &str,
        text: &str,
        format: MessageFormat,
    ) -> impl Future<Output = AppResult<()>> + Send;
}
