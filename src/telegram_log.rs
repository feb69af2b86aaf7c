use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// How often a pending "repeated N times" note is flushed.
const REPEAT_FLUSH: Duration = Duration::from_secs(60);

/// Forwards WARN/ERROR events to an admin chat, so spreadsheet or rate
/// outages are noticed without reading the log file.
pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl TelegramLogLayer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut collapser = RepeatCollapser::default();
            let mut interval = tokio::time::interval(REPEAT_FLUSH);

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        let Some(text) = msg else { break };
                        for out in collapser.push(text) {
                            send_log(&bot, chat_id, &out).await;
                        }
                    }
                    _ = interval.tick() => {
                        if let Some(note) = collapser.flush() {
                            send_log(&bot, chat_id, &note).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }
}

/// Swallows consecutive identical messages and reports how many were dropped.
#[derive(Default)]
struct RepeatCollapser {
    last: Option<String>,
    repeats: usize,
}

impl RepeatCollapser {
    /// Messages to send now for an incoming `text`.
    fn push(&mut self, text: String) -> Vec<String> {
        if self.last.as_deref() == Some(text.as_str()) {
            self.repeats += 1;
            return Vec::new();
        }
        let mut out: Vec<String> = self.flush().into_iter().collect();
        out.push(text.clone());
        self.last = Some(text);
        out
    }

    fn flush(&mut self) -> Option<String> {
        if self.repeats == 0 {
            return None;
        }
        let repeats = std::mem::take(&mut self.repeats);
        let last = self.last.as_deref().unwrap_or_default();
        let preview: String = last.chars().take(80).collect();
        Some(format!("🔁 repeated {repeats} more time(s): {preview}"))
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    let text = if text.len() > 4000 {
        let truncated: String = text.chars().take(4000).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    };
    if let Err(e) = bot.send_message(chat_id, &text).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let prefix = if level == Level::ERROR { "❌" } else { "⚠️" };
        if self.tx.send(format!("{prefix} {}", visitor.message)).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
