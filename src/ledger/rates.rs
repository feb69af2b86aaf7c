//! Exchange rates: the `RateSource` capability, a per-request memoizing
//! converter, and an HTTP source.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ledger::currency::Currency;
use crate::ledger::error::{LedgerError, Result};

/// Current exchange rates. Every call may hit the network.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// How many units of `to` one unit of `from` buys.
    async fn get_rate(&self, from: Currency, to: Currency) -> Result<Decimal>;
}

/// Memoizes rates for the lifetime of one statistics request.
///
/// Create a fresh converter per request; rates are never carried over.
pub struct RateConverter<'a> {
    source: &'a dyn RateSource,
    memo: HashMap<(Currency, Currency), Decimal>,
}

impl<'a> RateConverter<'a> {
    pub fn new(source: &'a dyn RateSource) -> Self {
        Self {
            source,
            memo: HashMap::new(),
        }
    }

    pub async fn rate(&mut self, from: Currency, to: Currency) -> Result<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        if let Some(rate) = self.memo.get(&(from, to)) {
            return Ok(*rate);
        }

        let rate = self.source.get_rate(from, to).await?;
        if rate <= Decimal::ZERO {
            return Err(LedgerError::RateUnavailable {
                from,
                to,
                reason: format!("source returned non-positive rate {rate}"),
            });
        }
        debug!("Rate {from}->{to} = {rate}");
        self.memo.insert((from, to), rate);
        Ok(rate)
    }
}

#[derive(Deserialize)]
struct LatestRates {
    result: String,
    #[serde(default)]
    rates: HashMap<String, serde_json::Number>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
}

/// Rates from an open.er-api.com compatible endpoint
/// (`GET {endpoint}/{FROM}` → `{"result":"success","rates":{"EUR":0.01,...}}`).
pub struct HttpRateSource {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpRateSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout: {e}");
                reqwest::Client::new()
            });
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn get_rate(&self, from: Currency, to: Currency) -> Result<Decimal> {
        let unavailable = |reason: String| LedgerError::RateUnavailable { from, to, reason };

        let url = format!("{}/{}", self.endpoint, from.code());
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(format!("HTTP error: {e}")))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status())));
        }
        let body: LatestRates = response
            .json()
            .await
            .map_err(|e| unavailable(format!("bad response: {e}")))?;

        pick_rate(&body, to).map_err(unavailable)
    }
}

fn pick_rate(body: &LatestRates, to: Currency) -> std::result::Result<Decimal, String> {
    if body.result != "success" {
        return Err(body
            .error_type
            .clone()
            .unwrap_or_else(|| format!("result '{}'", body.result)));
    }
    let number = body
        .rates
        .get(to.code())
        .ok_or_else(|| format!("no rate for {to}"))?;
    decimal_from_number(number).ok_or_else(|| format!("unreadable rate '{number}'"))
}

fn decimal_from_number(number: &serde_json::Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}
