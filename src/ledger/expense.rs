//! Expense rows and the sheet row layout.
//!
//! The data sheet columns are fixed:
//! `Date (DD.MM.YYYY) | Month (YYYY-MM) | Category | Amount | Currency | Who | Comment`.
//! [`ExpenseRow::to_cells`] and [`ExpenseRow::from_cells`] are the only places
//! that know this order.

use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::str::FromStr;

use crate::ledger::currency::Currency;
use crate::ledger::error::{LedgerError, Result};

pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// A calendar month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    /// `count` months ending with the month of `today`, newest first.
    pub fn recent(today: NaiveDate, count: usize) -> Vec<Self> {
        std::iter::successors(Some(Self::of(today)), |m| Some(m.previous()))
            .take(count)
            .collect()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("'{s}' is not a YYYY-MM month"))?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return Err(format!("'{s}' is not a YYYY-MM month"));
        }
        let year: i32 = year.parse().map_err(|_| format!("bad year in '{s}'"))?;
        let month: u32 = month.parse().map_err(|_| format!("bad month in '{s}'"))?;
        Self::new(year, month).ok_or_else(|| format!("month out of range in '{s}'"))
    }
}

/// One committed expense. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseRow {
    pub date: NaiveDate,
    pub month: YearMonth,
    pub category: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub who: String,
    pub comment: Option<String>,
}

impl ExpenseRow {
    /// Cell values in sheet column order.
    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.date.format(DATE_FORMAT).to_string(),
            self.month.to_string(),
            self.category.clone(),
            self.amount.to_string(),
            self.currency.code().to_string(),
            self.who.clone(),
            self.comment.clone().unwrap_or_default(),
        ]
    }

    /// Parse a row read back from the data sheet.
    ///
    /// The Sheets API drops trailing empty cells, so a missing comment column
    /// is fine. A month cell that doesn't parse is derived from the date.
    pub fn from_cells(cells: &[String]) -> std::result::Result<Self, String> {
        let cell = |i: usize| cells.get(i).map(|s| s.trim()).unwrap_or("");

        let date = parse_sheet_date(cell(0)).ok_or_else(|| format!("bad date '{}'", cell(0)))?;
        let month = cell(1).parse().unwrap_or_else(|_| YearMonth::of(date));
        let category = cell(2);
        if category.is_empty() {
            return Err("missing category".to_string());
        }
        let amount = parse_sheet_amount(cell(3)).ok_or_else(|| format!("bad amount '{}'", cell(3)))?;
        let currency: Currency = cell(4).parse()?;
        let comment = Some(cell(6)).filter(|c| !c.is_empty()).map(str::to_string);

        Ok(Self {
            date,
            month,
            category: category.to_string(),
            amount,
            currency,
            who: cell(5).to_string(),
            comment,
        })
    }
}

/// Rows parsed from a data sheet range.
#[derive(Debug, Default)]
pub struct ParsedRows {
    pub rows: Vec<ExpenseRow>,
    /// Non-empty rows that could not be parsed.
    pub skipped: usize,
}

/// Parse raw sheet rows, in storage order. Blank rows are ignored.
pub fn parse_rows(raw: &[Vec<String>]) -> ParsedRows {
    let mut parsed = ParsedRows::default();
    for (i, cells) in raw.iter().enumerate() {
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        match ExpenseRow::from_cells(cells) {
            Ok(row) => parsed.rows.push(row),
            Err(e) => {
                tracing::warn!("Skipping data row {}: {}", i + 2, e);
                parsed.skipped += 1;
            }
        }
    }
    parsed
}

/// Parse a user-typed amount. Accepts `.` or `,` as the decimal separator and
/// spaces as thousands grouping. Only positive values pass.
pub fn parse_amount(input: &str) -> Result<Decimal> {
    let normalized: String = input
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    let well_formed = !normalized.is_empty()
        && normalized.chars().all(|c| c.is_ascii_digit() || c == '.')
        && normalized.matches('.').count() <= 1
        && normalized.chars().any(|c| c.is_ascii_digit());
    if !well_formed {
        return Err(LedgerError::validation("Amount must be a number, e.g. 12.50"));
    }

    let amount = Decimal::from_str_exact(&normalized)
        .map_err(|_| LedgerError::validation("Amount is too large or too precise"))?;
    if amount <= Decimal::ZERO {
        return Err(LedgerError::validation("Amount must be greater than zero"));
    }
    Ok(amount)
}

/// Lenient amount parser for amount cells. Numbers normally arrive raw, but
/// cells typed as text may carry locale grouping (`1 234,50`, `1,234.50`)
/// and a sign.
///
/// A lone comma followed by exactly three digits (`1,234`) reads as either
/// grouping or decimals, so it is rejected rather than guessed.
fn parse_sheet_amount(cell: &str) -> Option<Decimal> {
    let compact: String = cell.chars().filter(|c| !c.is_whitespace()).collect();
    let normalized = match (compact.rfind(','), compact.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(comma), None) => {
            if compact.matches(',').count() > 1 || compact.len() - comma - 1 == 3 {
                return None;
            }
            compact.replace(',', ".")
        }
        _ => compact,
    };
    Decimal::from_str_exact(&normalized).ok()
}

fn parse_sheet_date(cell: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(cell, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(cell, "%Y-%m-%d"))
        .ok()
}

/// Parse a user-typed day: `DD.MM.YYYY`, `DD.MM.YY`, `DD.MM` (current year)
/// or `YYYY-MM-DD`.
pub fn parse_day(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let input = input.trim();
    if input.contains('-') {
        return NaiveDate::parse_from_str(input, "%Y-%m-%d").ok();
    }

    let parts: Vec<&str> = input.split('.').collect();
    let (day, month, year) = match parts.as_slice() {
        [d, m] => (*d, *m, None),
        [d, m, y] => (*d, *m, Some(*y)),
        _ => return None,
    };
    if day.is_empty() || day.len() > 2 || month.is_empty() || month.len() > 2 {
        return None;
    }
    let day: u32 = day.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let year: i32 = match year {
        None => today.year(),
        Some(y) if y.len() == 2 => 2000 + y.parse::<i32>().ok()?,
        Some(y) if y.len() == 4 => y.parse().ok()?,
        Some(_) => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Round for display only. Internal sums keep full precision.
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.2}")
}

/// Source of "today" in the household's time zone.
#[derive(Debug, Clone, Copy)]
pub struct Calendar {
    tz: Tz,
    pinned: Option<NaiveDate>,
}

impl Calendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz, pinned: None }
    }

    /// A calendar that is always on `day`.
    pub fn pinned(day: NaiveDate) -> Self {
        Self {
            tz: Tz::UTC,
            pinned: Some(day),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.pinned
            .unwrap_or_else(|| Utc::now().with_timezone(&self.tz).date_naive())
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}
