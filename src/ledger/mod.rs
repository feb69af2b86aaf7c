//! Family expense ledger: conversation flows, recording and statistics.

pub mod categories;
pub mod commands;
pub mod currency;
pub mod dialog;
pub mod engine;
pub mod error;
pub mod expense;
pub mod rates;
pub mod recorder;
pub mod sheets;
pub mod stats;
pub mod telegram;
pub mod users;

#[cfg(test)]
pub mod testing;

pub use categories::{Category, CategoryCache};
pub use commands::Command;
pub use currency::Currency;
pub use dialog::{ChoiceOption, InputEvent, Reply};
pub use engine::{ConversationEngine, EngineSettings};
pub use error::LedgerError;
pub use expense::{Calendar, ExpenseRow, YearMonth};
pub use rates::{HttpRateSource, RateSource};
pub use recorder::ExpenseRecorder;
pub use sheets::{GoogleSheets, Sheet, SheetLayout};
pub use stats::StatsAggregator;
pub use telegram::{Chat, TelegramClient};
pub use users::{RegistrationError, User, UserRegistry};
