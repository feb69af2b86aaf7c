//! spendbot: a family expense ledger on Telegram backed by Google Sheets.

pub mod config;
pub mod ledger;
pub mod telegram_log;
