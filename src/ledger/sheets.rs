//! Spreadsheet access: the `Sheet` capability and its Google Sheets client.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ledger::error::{LedgerError, Result};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Numbers come back raw so display formats (`#,##0`) can't change their
/// value; dates keep their displayed text.
const READ_OPTIONS: [(&str, &str); 2] = [
    ("valueRenderOption", "UNFORMATTED_VALUE"),
    ("dateTimeRenderOption", "FORMATTED_STRING"),
];

/// Access tokens from `gcloud` live for an hour; refresh well before that.
const TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Append-only spreadsheet store.
#[async_trait]
pub trait Sheet: Send + Sync {
    /// Append one row to the data sheet. Returns the range the row landed in.
    async fn append_row(&self, values: Vec<String>) -> Result<String>;

    /// Read `range` (A1 notation without the sheet name) from `sheet_name`.
    async fn read_range(&self, sheet_name: &str, range: &str) -> Result<Vec<Vec<String>>>;

    /// Category names from column A of the config sheet, header excluded.
    async fn read_categories(&self) -> Result<Vec<String>>;
}

/// Sheet names and spreadsheet identity.
#[derive(Debug, Clone)]
pub struct SheetLayout {
    pub spreadsheet_id: String,
    pub data_sheet: String,
    pub config_sheet: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    updates: Option<AppendUpdates>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: Option<String>,
}

/// Google Sheets v4 REST client.
///
/// Authentication is delegated to an external command that prints an OAuth
/// access token (e.g. `gcloud auth application-default print-access-token`).
pub struct GoogleSheets {
    layout: SheetLayout,
    token_command: String,
    http: reqwest::Client,
    token: Mutex<Option<(String, Instant)>>,
}

impl GoogleSheets {
    pub fn new(layout: SheetLayout, token_command: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout: {e}");
                reqwest::Client::new()
            });
        Self {
            layout,
            token_command,
            http,
            token: Mutex::new(None),
        }
    }

    pub fn layout(&self) -> &SheetLayout {
        &self.layout
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, fetched_at)) = cached.as_ref()
            && fetched_at.elapsed() < TOKEN_TTL
        {
            return Ok(token.clone());
        }

        debug!("Refreshing Google access token");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.token_command)
            .output()
            .await
            .map_err(|e| LedgerError::source_unavailable(format!("token command failed to start: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LedgerError::source_unavailable(format!(
                "token command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(LedgerError::source_unavailable("token command printed nothing"));
        }
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    fn values_url(&self, sheet_name: &str, range: &str) -> String {
        let a1 = format!("{sheet_name}!{range}");
        format!(
            "{}/{}/values/{}",
            SHEETS_API,
            self.layout.spreadsheet_id,
            urlencoding::encode(&a1)
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| LedgerError::source_unavailable(format!("HTTP error: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Next call fetches a fresh token.
            self.forget_token().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(300).collect();
            return Err(LedgerError::source_unavailable(format!("Sheets API {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl Sheet for GoogleSheets {
    async fn append_row(&self, values: Vec<String>) -> Result<String> {
        let url = format!("{}:append", self.values_url(&self.layout.data_sheet, "A:G"));
        let body = serde_json::json!({ "values": [values] });
        let request = self
            .http
            .post(url)
            .query(&[("valueInputOption", "USER_ENTERED"), ("insertDataOption", "INSERT_ROWS")])
            .json(&body);

        let response = self.send(request).await?;
        let parsed: AppendResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::source_unavailable(format!("bad append response: {e}")))?;
        let range = parsed
            .updates
            .and_then(|u| u.updated_range)
            .unwrap_or_else(|| format!("{}!?", self.layout.data_sheet));
        info!("📝 Appended row at {}", range);
        Ok(range)
    }

    async fn read_range(&self, sheet_name: &str, range: &str) -> Result<Vec<Vec<String>>> {
        let request = self
            .http
            .get(self.values_url(sheet_name, range))
            .query(&READ_OPTIONS);

        let response = self.send(request).await?;
        let parsed: ValueRange = response
            .json()
            .await
            .map_err(|e| LedgerError::source_unavailable(format!("bad range response: {e}")))?;
        debug!("Read {} row(s) from {}!{}", parsed.values.len(), sheet_name, range);
        Ok(parsed
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn read_categories(&self) -> Result<Vec<String>> {
        let column = self.read_range(&self.layout.config_sheet, "A:A").await?;
        Ok(category_column(column))
    }
}

/// Flatten a single-column range into category names: first non-blank cell
/// is the header, blanks are dropped.
pub fn category_column(rows: Vec<Vec<String>>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| row.into_iter().next())
        .map(|cell| cell.trim().to_string())
        .filter(|cell| !cell.is_empty())
        .skip(1)
        .collect()
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
