//! In-memory fakes for the spreadsheet and rate capabilities.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::ledger::currency::Currency;
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::expense::{ExpenseRow, YearMonth};
use crate::ledger::rates::RateSource;
use crate::ledger::sheets::Sheet;

pub fn d(s: &str) -> Decimal {
    Decimal::from_str_exact(s).unwrap()
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%d.%m.%Y").unwrap()
}

pub fn row(day: &str, category: &str, amount: &str, currency: Currency) -> ExpenseRow {
    let date = date(day);
    ExpenseRow {
        date,
        month: YearMonth::of(date),
        category: category.to_string(),
        amount: d(amount),
        currency,
        who: "Lisa".to_string(),
        comment: None,
    }
}

/// Sheet kept in memory. Appended rows become readable data rows.
pub struct FakeSheet {
    categories: Mutex<std::result::Result<Vec<String>, String>>,
    data: Mutex<Vec<Vec<String>>>,
    appended: Mutex<Vec<Vec<String>>>,
    fail_appends: AtomicBool,
    fail_reads: AtomicBool,
    category_reads: AtomicUsize,
    data_reads: AtomicUsize,
}

impl FakeSheet {
    pub fn with_categories(names: &[&str]) -> Self {
        Self {
            categories: Mutex::new(Ok(names.iter().map(|s| s.to_string()).collect())),
            data: Mutex::new(Vec::new()),
            appended: Mutex::new(Vec::new()),
            fail_appends: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            category_reads: AtomicUsize::new(0),
            data_reads: AtomicUsize::new(0),
        }
    }

    pub fn set_categories(&self, names: &[&str]) {
        *self.categories.lock().unwrap() = Ok(names.iter().map(|s| s.to_string()).collect());
    }

    pub fn fail_categories(&self, reason: &str) {
        *self.categories.lock().unwrap() = Err(reason.to_string());
    }

    pub fn push_row(&self, row: &ExpenseRow) {
        self.data.lock().unwrap().push(row.to_cells());
    }

    pub fn push_raw(&self, cells: &[&str]) {
        self.data
            .lock()
            .unwrap()
            .push(cells.iter().map(|s| s.to_string()).collect());
    }

    pub fn appended(&self) -> Vec<Vec<String>> {
        self.appended.lock().unwrap().clone()
    }

    pub fn set_append_failing(&self, failing: bool) {
        self.fail_appends.store(failing, Ordering::SeqCst);
    }

    pub fn set_reads_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    pub fn category_reads(&self) -> usize {
        self.category_reads.load(Ordering::SeqCst)
    }

    pub fn data_reads(&self) -> usize {
        self.data_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sheet for FakeSheet {
    async fn append_row(&self, values: Vec<String>) -> Result<String> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(LedgerError::source_unavailable("connection reset"));
        }
        self.appended.lock().unwrap().push(values.clone());
        let mut data = self.data.lock().unwrap();
        data.push(values);
        let line = data.len() + 1;
        Ok(format!("Data!A{line}:G{line}"))
    }

    async fn read_range(&self, _sheet_name: &str, _range: &str) -> Result<Vec<Vec<String>>> {
        self.data_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::source_unavailable("timeout"));
        }
        Ok(self.data.lock().unwrap().clone())
    }

    async fn read_categories(&self) -> Result<Vec<String>> {
        self.category_reads.fetch_add(1, Ordering::SeqCst);
        self.categories
            .lock()
            .unwrap()
            .clone()
            .map_err(LedgerError::SourceUnavailable)
    }
}

/// Fixed rate table. Missing pairs fail like a network error would.
#[derive(Default)]
pub struct FakeRates {
    rates: Mutex<HashMap<(Currency, Currency), Decimal>>,
    calls: AtomicUsize,
}

impl FakeRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, from: Currency, to: Currency, rate: Decimal) -> Self {
        self.set(from, to, rate);
        self
    }

    pub fn set(&self, from: Currency, to: Currency, rate: Decimal) {
        self.rates.lock().unwrap().insert((from, to), rate);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateSource for FakeRates {
    async fn get_rate(&self, from: Currency, to: Currency) -> Result<Decimal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.rates
            .lock()
            .unwrap()
            .get(&(from, to))
            .copied()
            .ok_or_else(|| LedgerError::RateUnavailable {
                from,
                to,
                reason: "timed out".to_string(),
            })
    }
}
