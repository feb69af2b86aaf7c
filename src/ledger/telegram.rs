//! Telegram side of the `Chat` capability.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use tracing::warn;

use crate::ledger::dialog::{ChoiceOption, Reply};

/// Buttons per keyboard row.
const ROW_WIDTH: usize = 2;

/// Outgoing side of a chat transport.
#[async_trait]
pub trait Chat: Send + Sync {
    /// Send `reply` with its choices as buttons. Returns the sent message id.
    async fn prompt(&self, chat_id: i64, reply: &Reply) -> Result<i64, String>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Stop the spinner on a pressed button.
    pub async fn answer_callback(&self, query: &CallbackQuery) {
        if let Err(e) = self.bot.answer_callback_query(query.id.clone()).await {
            warn!("Failed to answer callback: {e}");
        }
    }

    /// Remove the buttons from an earlier prompt so they can't be pressed twice.
    pub async fn clear_keyboard(&self, chat_id: i64, message_id: i32) {
        let result = self
            .bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id))
            .await;
        if let Err(e) = result {
            warn!("Failed to clear keyboard on {message_id} in chat {chat_id}: {e}");
        }
    }
}

#[async_trait]
impl Chat for TelegramClient {
    async fn prompt(&self, chat_id: i64, reply: &Reply) -> Result<i64, String> {
        let mut request = self.bot.send_message(ChatId(chat_id), &reply.text);
        if !reply.choices.is_empty() {
            request = request.reply_markup(keyboard(&reply.choices));
        }
        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }
}

fn keyboard(choices: &[ChoiceOption]) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = choices
        .chunks(ROW_WIDTH)
        .map(|row| {
            row.iter()
                .map(|c| InlineKeyboardButton::callback(c.label.clone(), c.key.clone()))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}
