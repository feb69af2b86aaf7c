//! Validates one expense and appends it to the data sheet.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::ledger::categories::{self, CategoryCache};
use crate::ledger::currency::Currency;
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::expense::{Calendar, ExpenseRow, YearMonth};
use crate::ledger::sheets::Sheet;
use crate::ledger::users::User;

/// Where a recorded row landed, as reported by the sheet (e.g. `Data!A42:G42`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct ExpenseRecorder {
    sheet: Arc<dyn Sheet>,
    categories: Arc<CategoryCache>,
    calendar: Calendar,
    currencies: Vec<Currency>,
}

impl ExpenseRecorder {
    pub fn new(
        sheet: Arc<dyn Sheet>,
        categories: Arc<CategoryCache>,
        calendar: Calendar,
        currencies: Vec<Currency>,
    ) -> Self {
        Self {
            sheet,
            categories,
            calendar,
            currencies,
        }
    }

    /// Record an expense dated today.
    pub async fn record(
        &self,
        user: &User,
        category: &str,
        amount: Decimal,
        currency: Currency,
        comment: Option<&str>,
    ) -> Result<RecordId> {
        let today = self.calendar.today();
        self.record_on(today, user, category, amount, currency, comment).await
    }

    /// Record an expense on an explicit day, which may not be in the future.
    ///
    /// Appends exactly one row; a failed append is reported, never retried.
    pub async fn record_on(
        &self,
        date: NaiveDate,
        user: &User,
        category: &str,
        amount: Decimal,
        currency: Currency,
        comment: Option<&str>,
    ) -> Result<RecordId> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("Amount must be greater than zero"));
        }
        if date > self.calendar.today() {
            return Err(LedgerError::validation("The date can't be in the future"));
        }
        if !self.currencies.contains(&currency) {
            return Err(LedgerError::validation(format!("{currency} is not enabled")));
        }
        let known = self.categories.get().await?;
        if categories::find(&known, category).is_none() {
            return Err(LedgerError::validation(format!("Category '{category}' no longer exists")));
        }

        let row = ExpenseRow {
            date,
            month: YearMonth::of(date),
            category: category.to_string(),
            amount,
            currency,
            who: user.display_name.clone(),
            comment: comment
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        };
        let range = self.sheet.append_row(row.to_cells()).await?;
        info!(
            "💸 {} recorded {} {} for {} ({})",
            user.display_name, amount, currency, category, range
        );
        Ok(RecordId(range))
    }
}
