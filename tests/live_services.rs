//! Integration tests against the real rate API and spreadsheet.
//!
//! The rate test needs network access. The spreadsheet test additionally
//! needs a config file pointing at a test spreadsheet:
//!
//!   SPENDBOT_TEST_CONFIG=test.json cargo test --features integ_test --test live_services

#[cfg(feature = "integ_test")]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;
    use spendbot::config::Config;
    use spendbot::ledger::{Currency, GoogleSheets, HttpRateSource, LedgerError, RateSource, Sheet};

    const RATES_ENDPOINT: &str = "https://open.er-api.com/v6/latest";

    fn test_config() -> Option<Config> {
        let path = std::env::var("SPENDBOT_TEST_CONFIG").ok()?;
        match Config::load(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Skipping test: {e}");
                None
            }
        }
    }

    #[tokio::test]
    async fn test_live_rate_is_positive() {
        let rates = HttpRateSource::new(RATES_ENDPOINT, Duration::from_secs(10));
        let rate = rates.get_rate(Currency::Eur, Currency::Rsd).await;
        assert!(rate.is_ok(), "Rate lookup failed: {:?}", rate.err());
        assert!(rate.unwrap() > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_rate_unavailable() {
        let rates = HttpRateSource::new("http://127.0.0.1:9", Duration::from_secs(2));
        let err = rates.get_rate(Currency::Rub, Currency::Eur).await.unwrap_err();
        assert!(matches!(err, LedgerError::RateUnavailable { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_live_sheet_has_categories() {
        let Some(config) = test_config() else {
            eprintln!("Skipping test: SPENDBOT_TEST_CONFIG not set");
            return;
        };
        let sheets = GoogleSheets::new(
            config.sheets.clone(),
            config.google_token_command.clone(),
            Duration::from_secs(30),
        );

        let categories = sheets.read_categories().await;
        assert!(categories.is_ok(), "Reading categories failed: {:?}", categories.err());
        assert!(!categories.unwrap().is_empty(), "Config sheet has no categories");

        let rows = sheets.read_range(&config.sheets.data_sheet, "A1:G1").await;
        assert!(rows.is_ok(), "Reading data header failed: {:?}", rows.err());
    }
}
