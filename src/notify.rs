//! Notification gateway — send a text to the registered owner recipient.
//!
//! Wraps the Telegram send call behind a trait so the dispatcher (and its
//! tests) never touch the messaging API directly. Failures come back as
//! `Err` values; the caller logs and carries on — a failed notification
//! never rolls back a call that already opened.

use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;

/// Boxed future returned by [`NotificationGateway::send`].
pub type SendFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// Capability to deliver a text message to the configured recipient.
pub trait NotificationGateway: Send + Sync {
    fn send(&self, text: &str) -> SendFuture;
}

/// Telegram-backed gateway: one bot, one chat id.
#[cfg(feature = "channel-telegram")]
pub struct TelegramGateway {
    bot: teloxide::Bot,
    chat_id: teloxide::types::ChatId,
}

#[cfg(feature = "channel-telegram")]
impl TelegramGateway {
    pub fn new(bot: teloxide::Bot, chat_id: i64) -> Self {
        Self { bot, chat_id: teloxide::types::ChatId(chat_id) }
    }
}

#[cfg(feature = "channel-telegram")]
impl NotificationGateway for TelegramGateway {
    fn send(&self, text: &str) -> SendFuture {
        use teloxide::prelude::*;

        let bot = self.bot.clone();
        let chat_id = self.chat_id;
        let text = text.to_string();
        Box::pin(async move {
            tracing::debug!(%chat_id, "sending telegram notification");
            bot.send_message(chat_id, text)
                .await
                .map(|_| ())
                .map_err(|e| AppError::Notify(format!("telegram send failed: {e}")))
        })
    }
}
