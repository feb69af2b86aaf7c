use chrono_tz::Tz;
use cron::Schedule;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use teloxide::types::ChatId;
use thiserror::Error;

use crate::ledger::currency::Currency;
use crate::ledger::engine::EngineSettings;
use crate::ledger::sheets::SheetLayout;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Chat id → display name written to the "Who" column.
    #[serde(default)]
    users: HashMap<i64, String>,
    /// Allow unknown chats to `/register` themselves.
    #[serde(default)]
    registration_open: bool,
    spreadsheet_id: String,
    #[serde(default = "default_data_sheet")]
    data_sheet: String,
    #[serde(default = "default_config_sheet")]
    config_sheet: String,
    /// Shell command printing a Google OAuth access token.
    #[serde(default = "default_token_command")]
    google_token_command: String,
    #[serde(default = "default_currencies")]
    currencies: Vec<Currency>,
    #[serde(default = "default_rates_endpoint")]
    rates_endpoint: String,
    #[serde(default = "default_rate_timeout_secs")]
    rate_timeout_secs: u64,
    #[serde(default = "default_conversation_timeout_minutes")]
    conversation_timeout_minutes: u64,
    #[serde(default = "default_last_n")]
    last_n: usize,
    /// 7-field cron expression; unset means refresh only via /reloadcats.
    category_refresh_cron: Option<String>,
    #[serde(default = "default_timezone")]
    timezone: String,
    log_chat_id: Option<i64>,
    /// Directory for state files (logs, users.db). Defaults to current directory.
    data_dir: Option<String>,
}

fn default_data_sheet() -> String {
    "Data".to_string()
}

fn default_config_sheet() -> String {
    "Config".to_string()
}

fn default_token_command() -> String {
    "gcloud auth application-default print-access-token".to_string()
}

fn default_currencies() -> Vec<Currency> {
    vec![Currency::Rub, Currency::Rsd, Currency::Eur]
}

fn default_rates_endpoint() -> String {
    "https://open.er-api.com/v6/latest".to_string()
}

fn default_rate_timeout_secs() -> u64 {
    10
}

fn default_conversation_timeout_minutes() -> u64 {
    15
}

fn default_last_n() -> usize {
    3
}

fn default_timezone() -> String {
    "UTC".to_string()
}

pub struct Config {
    pub telegram_bot_token: String,
    pub users: HashMap<i64, String>,
    pub registration_open: bool,
    pub sheets: SheetLayout,
    pub google_token_command: String,
    /// Enabled currencies, in button order.
    pub currencies: Vec<Currency>,
    pub rates_endpoint: String,
    pub rate_timeout: Duration,
    pub conversation_timeout: Duration,
    pub last_n: usize,
    pub category_refresh: Option<Schedule>,
    pub timezone: Tz,
    pub log_chat_id: Option<ChatId>,
    /// Directory for state files (logs, users.db).
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.spreadsheet_id.trim().is_empty() {
            return Err(ConfigError::Validation("spreadsheet_id is required".into()));
        }
        if file.google_token_command.trim().is_empty() {
            return Err(ConfigError::Validation("google_token_command must not be empty".into()));
        }
        if file.users.is_empty() && !file.registration_open {
            return Err(ConfigError::Validation(
                "users is empty and registration_open is false; nobody could use the bot".into(),
            ));
        }
        if let Some((id, _)) = file.users.iter().find(|(_, name)| name.trim().is_empty()) {
            return Err(ConfigError::Validation(format!("users: empty name for chat {id}")));
        }

        let mut currencies: Vec<Currency> = Vec::with_capacity(file.currencies.len());
        for currency in file.currencies {
            if !currencies.contains(&currency) {
                currencies.push(currency);
            }
        }
        if currencies.is_empty() {
            return Err(ConfigError::Validation("currencies must list at least one currency".into()));
        }

        if file.last_n == 0 {
            return Err(ConfigError::Validation("last_n must be at least 1".into()));
        }
        if file.conversation_timeout_minutes == 0 {
            return Err(ConfigError::Validation("conversation_timeout_minutes must be at least 1".into()));
        }
        if file.rate_timeout_secs == 0 {
            return Err(ConfigError::Validation("rate_timeout_secs must be at least 1".into()));
        }

        let category_refresh = file
            .category_refresh_cron
            .as_deref()
            .map(|expr| {
                Schedule::from_str(expr).map_err(|e| {
                    ConfigError::Validation(format!("category_refresh_cron '{expr}' is invalid: {e}"))
                })
            })
            .transpose()?;

        let timezone: Tz = file
            .timezone
            .parse()
            .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", file.timezone)))?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            users: file.users,
            registration_open: file.registration_open,
            sheets: SheetLayout {
                spreadsheet_id: file.spreadsheet_id,
                data_sheet: file.data_sheet,
                config_sheet: file.config_sheet,
            },
            google_token_command: file.google_token_command,
            currencies,
            rates_endpoint: file.rates_endpoint,
            rate_timeout: Duration::from_secs(file.rate_timeout_secs),
            conversation_timeout: Duration::from_secs(file.conversation_timeout_minutes * 60),
            last_n: file.last_n,
            category_refresh,
            timezone,
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            timeout: self.conversation_timeout,
            last_n: self.last_n,
            currencies: self.currencies.clone(),
            data_sheet: self.sheets.data_sheet.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "spreadsheet_id": "1AbC",
            "users": {"111": "Lisa", "222": "Bart"}
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.users.get(&111).map(String::as_str), Some("Lisa"));
        assert!(!config.registration_open);
        assert_eq!(config.sheets.data_sheet, "Data");
        assert_eq!(config.sheets.config_sheet, "Config");
        assert_eq!(config.currencies, vec![Currency::Rub, Currency::Rsd, Currency::Eur]);
        assert_eq!(config.conversation_timeout, Duration::from_secs(15 * 60));
        assert_eq!(config.last_n, 3);
        assert!(config.category_refresh.is_none());
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.data_dir, PathBuf::from("."));
    }

    #[test]
    fn test_full_config() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "spreadsheet_id": "1AbC",
            "registration_open": true,
            "currencies": ["eur", "CNY", "EUR"],
            "conversation_timeout_minutes": 5,
            "last_n": 10,
            "category_refresh_cron": "0 0 6 * * * *",
            "timezone": "Europe/Belgrade",
            "log_chat_id": -100123,
            "data_dir": "/var/lib/spendbot"
        }"#);
        let config = Config::load(file.path()).expect("should load full config");
        assert_eq!(config.currencies, vec![Currency::Eur, Currency::Cny]);
        assert_eq!(config.engine_settings().timeout, Duration::from_secs(300));
        assert_eq!(config.engine_settings().last_n, 10);
        assert!(config.category_refresh.is_some());
        assert_eq!(config.timezone, chrono_tz::Europe::Belgrade);
        assert_eq!(config.log_chat_id, Some(ChatId(-100123)));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{
            "telegram_bot_token": "",
            "spreadsheet_id": "1AbC",
            "users": {"1": "Lisa"}
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["invalid_token_no_colon", "notanumber:ABCdef", "123456789:"] {
            let file = write_config(&format!(
                r#"{{"telegram_bot_token": "{token}", "spreadsheet_id": "x", "users": {{"1": "Lisa"}}}}"#
            ));
            let err = assert_err(Config::load(file.path()));
            assert!(matches!(err, ConfigError::Validation(_)), "{token}");
        }
    }

    #[test]
    fn test_nobody_can_use_the_bot() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "spreadsheet_id": "1AbC"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("registration_open"));
    }

    #[test]
    fn test_unknown_currency() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "spreadsheet_id": "1AbC",
            "users": {"1": "Lisa"},
            "currencies": ["RUB", "GBP"]
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_invalid_cron() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "spreadsheet_id": "1AbC",
            "users": {"1": "Lisa"},
            "category_refresh_cron": "every morning"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("category_refresh_cron"));
    }

    #[test]
    fn test_invalid_timezone() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "spreadsheet_id": "1AbC",
            "users": {"1": "Lisa"},
            "timezone": "Mars/Olympus"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("timezone"));
    }

    #[test]
    fn test_zero_last_n() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "spreadsheet_id": "1AbC",
            "users": {"1": "Lisa"},
            "last_n": 0
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("last_n"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
