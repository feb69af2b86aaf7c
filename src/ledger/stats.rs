//! Statistics: filtering, grouping and currency conversion over sheet rows.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use crate::ledger::currency::Currency;
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::expense::{DATE_FORMAT, ExpenseRow, YearMonth, format_amount};
use crate::ledger::rates::{RateConverter, RateSource};

/// Which rows a report covers.
#[derive(Debug, Clone, PartialEq)]
pub enum Period {
    /// The `n` most recent rows, newest first.
    LastN(usize),
    /// Inclusive date bounds.
    Range { start: NaiveDate, end: NaiveDate },
    /// One month, or per-month subtotals for every month when `None`.
    Month(Option<YearMonth>),
}

impl Period {
    pub fn label(&self) -> String {
        match self {
            Period::LastN(n) => format!("last {n} entries"),
            Period::Range { start, end } => {
                format!("{} – {}", start.format(DATE_FORMAT), end.format(DATE_FORMAT))
            }
            Period::Month(Some(month)) => month.to_string(),
            Period::Month(None) => "by month".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsFilter {
    /// Exact category name; `None` covers all categories.
    pub category: Option<String>,
    pub period: Period,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    ByCurrency,
    ConvertTo(Currency),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyTotal {
    pub total: Decimal,
    pub count: usize,
}

/// How one source currency contributed to a converted total.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionLine {
    pub currency: Currency,
    pub subtotal: Decimal,
    pub rate: Decimal,
    pub converted: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    ByCurrency {
        totals: BTreeMap<Currency, CurrencyTotal>,
    },
    Converted {
        target: Currency,
        total: Decimal,
        breakdown: Vec<ConversionLine>,
    },
}

/// Totals for one bucket of rows: the whole selection, or one month.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub month: Option<YearMonth>,
    pub count: usize,
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsResult {
    pub filter: StatsFilter,
    pub grouping: Grouping,
    pub record_count: usize,
    /// The selected rows themselves, only for [`Period::LastN`].
    pub recent: Vec<ExpenseRow>,
    pub sections: Vec<Section>,
}

pub struct StatsAggregator {
    rates: Arc<dyn RateSource>,
}

impl StatsAggregator {
    pub fn new(rates: Arc<dyn RateSource>) -> Self {
        Self { rates }
    }

    /// Filter `rows` (in storage order) and total them.
    ///
    /// Any failed rate lookup fails the whole request.
    pub async fn aggregate(
        &self,
        rows: &[ExpenseRow],
        filter: &StatsFilter,
        grouping: Grouping,
    ) -> Result<StatsResult> {
        let in_scope = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.category.as_ref().is_none_or(|c| &row.category == c));

        let selected: Vec<&ExpenseRow> = match &filter.period {
            Period::LastN(n) => {
                let mut indexed: Vec<(usize, &ExpenseRow)> = in_scope.collect();
                // Newest date first; among equal dates the later append wins.
                indexed.sort_by(|(ia, a), (ib, b)| b.date.cmp(&a.date).then(ib.cmp(ia)));
                indexed.into_iter().take(*n).map(|(_, row)| row).collect()
            }
            Period::Range { start, end } => in_scope
                .map(|(_, row)| row)
                .filter(|row| row.date >= *start && row.date <= *end)
                .collect(),
            Period::Month(Some(month)) => in_scope
                .map(|(_, row)| row)
                .filter(|row| row.month == *month)
                .collect(),
            Period::Month(None) => in_scope.map(|(_, row)| row).collect(),
        };

        let mut converter = RateConverter::new(self.rates.as_ref());
        let mut sections = Vec::new();
        match &filter.period {
            Period::Month(None) => {
                let mut by_month: BTreeMap<YearMonth, Vec<&ExpenseRow>> = BTreeMap::new();
                for row in &selected {
                    by_month.entry(row.month).or_default().push(row);
                }
                for (month, bucket) in by_month {
                    let summary = summarize(&bucket, grouping, &mut converter).await?;
                    sections.push(Section {
                        month: Some(month),
                        count: bucket.len(),
                        summary,
                    });
                }
            }
            period if !selected.is_empty() => {
                let month = match period {
                    Period::Month(m) => *m,
                    _ => None,
                };
                let summary = summarize(&selected, grouping, &mut converter).await?;
                sections.push(Section {
                    month,
                    count: selected.len(),
                    summary,
                });
            }
            _ => {}
        }

        let recent = match filter.period {
            Period::LastN(_) => selected.iter().map(|row| (*row).clone()).collect(),
            _ => Vec::new(),
        };

        Ok(StatsResult {
            filter: filter.clone(),
            grouping,
            record_count: selected.len(),
            recent,
            sections,
        })
    }
}

async fn summarize(
    rows: &[&ExpenseRow],
    grouping: Grouping,
    converter: &mut RateConverter<'_>,
) -> Result<Summary> {
    let mut totals: BTreeMap<Currency, CurrencyTotal> = BTreeMap::new();
    for row in rows {
        let entry = totals.entry(row.currency).or_insert(CurrencyTotal {
            total: Decimal::ZERO,
            count: 0,
        });
        entry.total = checked_add(entry.total, row.amount)?;
        entry.count += 1;
    }

    let target = match grouping {
        Grouping::ByCurrency => return Ok(Summary::ByCurrency { totals }),
        Grouping::ConvertTo(target) => target,
    };

    let mut breakdown = Vec::with_capacity(totals.len());
    let mut total = Decimal::ZERO;
    for (currency, subtotal) in totals {
        let rate = converter.rate(currency, target).await?;
        let mut converted = Decimal::ZERO;
        for row in rows.iter().filter(|r| r.currency == currency) {
            let value = row
                .amount
                .checked_mul(rate)
                .ok_or_else(|| LedgerError::validation("converted amount is out of range"))?;
            converted = checked_add(converted, value)?;
        }
        total = checked_add(total, converted)?;
        breakdown.push(ConversionLine {
            currency,
            subtotal: subtotal.total,
            rate,
            converted,
            count: subtotal.count,
        });
    }

    Ok(Summary::Converted {
        target,
        total,
        breakdown,
    })
}

fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::validation("total is out of range"))
}

impl StatsResult {
    /// Human-readable report. Amounts are rounded to 2 digits here and only here.
    pub fn render(&self) -> String {
        let scope = self.filter.category.as_deref().unwrap_or("All categories");
        let mut out = format!("📊 {} · {}\n", scope, self.filter.period.label());

        if self.sections.is_empty() {
            out.push_str("No data 🤷");
            return out;
        }

        for row in &self.recent {
            let _ = write!(
                out,
                "• {} {} — {} {} ({})",
                row.date.format(DATE_FORMAT),
                row.category,
                format_amount(row.amount),
                row.currency,
                row.who
            );
            if let Some(comment) = &row.comment {
                let _ = write!(out, " {comment}");
            }
            out.push('\n');
        }
        if !self.recent.is_empty() {
            out.push('\n');
        }

        for section in &self.sections {
            let indent = if let Some(month) = section.month.filter(|_| self.sections.len() > 1) {
                let _ = writeln!(out, "{month} ({} records):", section.count);
                "  "
            } else {
                ""
            };
            render_summary(&mut out, &section.summary, indent);
        }

        let _ = write!(out, "Records: {}", self.record_count);
        out
    }
}

fn render_summary(out: &mut String, summary: &Summary, indent: &str) {
    match summary {
        Summary::ByCurrency { totals } => {
            for (currency, t) in totals {
                let _ = writeln!(out, "{indent}{currency}: {} ({})", format_amount(t.total), t.count);
            }
        }
        Summary::Converted {
            target,
            total,
            breakdown,
        } => {
            let _ = writeln!(out, "{indent}Total: {} {target}", format_amount(*total));
            for line in breakdown {
                let _ = writeln!(
                    out,
                    "{indent}  {} {} × {} = {} {target}",
                    format_amount(line.subtotal),
                    line.currency,
                    line.rate.normalize(),
                    format_amount(line.converted)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{FakeRates, d, date, row};

    fn aggregator(rates: FakeRates) -> (StatsAggregator, Arc<FakeRates>) {
        let rates = Arc::new(rates);
        (StatsAggregator::new(rates.clone()), rates)
    }

    fn all(period: Period) -> StatsFilter {
        StatsFilter {
            category: None,
            period,
        }
    }

    fn totals(result: &StatsResult) -> &BTreeMap<Currency, CurrencyTotal> {
        match &result.sections[0].summary {
            Summary::ByCurrency { totals } => totals,
            other => panic!("expected per-currency totals, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_by_currency_counts_every_row_once() {
        let rows = vec![
            row("01.07.2025", "Food", "10.10", Currency::Rub),
            row("02.07.2025", "Food", "5", Currency::Eur),
            row("03.07.2025", "Fun", "0.90", Currency::Rub),
            row("04.06.2025", "Fun", "100", Currency::Rsd),
        ];
        let (stats, rates) = aggregator(FakeRates::new());
        let result = stats
            .aggregate(&rows, &all(Period::Month(Some(YearMonth::of(date("01.07.2025"))))), Grouping::ByCurrency)
            .await
            .unwrap();

        let totals = totals(&result);
        assert_eq!(totals[&Currency::Rub], CurrencyTotal { total: d("11.00"), count: 2 });
        assert_eq!(totals[&Currency::Eur], CurrencyTotal { total: d("5"), count: 1 });
        assert!(!totals.contains_key(&Currency::Rsd));
        let counted: usize = totals.values().map(|t| t.count).sum();
        assert_eq!(counted, result.record_count);
        assert_eq!(result.record_count, 3);
        assert_eq!(rates.calls(), 0);
    }

    #[tokio::test]
    async fn test_convert_mixed_currencies() {
        let rows = vec![
            row("01.07.2025", "Food", "100", Currency::Rub),
            row("02.07.2025", "Food", "10", Currency::Eur),
        ];
        let (stats, _) = aggregator(FakeRates::new().with(Currency::Eur, Currency::Rub, d("100")));
        let result = stats
            .aggregate(&rows, &all(Period::Month(None)), Grouping::ConvertTo(Currency::Rub))
            .await
            .unwrap();

        let Summary::Converted { total, breakdown, .. } = &result.sections[0].summary else {
            panic!("expected a converted summary");
        };
        assert_eq!(*total, d("1100"));
        assert_eq!(breakdown.len(), 2);
        assert_eq!((breakdown[0].currency, breakdown[0].subtotal, breakdown[0].rate), (Currency::Rub, d("100"), d("1")));
        assert_eq!((breakdown[1].currency, breakdown[1].subtotal, breakdown[1].rate), (Currency::Eur, d("10"), d("100")));
        assert_eq!(breakdown[1].converted, d("1000"));
    }

    #[tokio::test]
    async fn test_convert_to_own_currency_needs_no_rates() {
        let rows = vec![
            row("01.07.2025", "Food", "1.11", Currency::Eur),
            row("05.07.2025", "Rent", "2.22", Currency::Eur),
            row("09.07.2025", "Fun", "3.33", Currency::Eur),
        ];
        let (stats, rates) = aggregator(FakeRates::new());
        let result = stats
            .aggregate(&rows, &all(Period::LastN(10)), Grouping::ConvertTo(Currency::Eur))
            .await
            .unwrap();

        let Summary::Converted { total, .. } = &result.sections[0].summary else {
            panic!("expected a converted summary");
        };
        assert_eq!(*total, d("6.66"));
        assert_eq!(rates.calls(), 0);
    }

    #[tokio::test]
    async fn test_one_missing_rate_fails_everything() {
        let rows = vec![
            row("01.07.2025", "Food", "100", Currency::Rub),
            row("02.07.2025", "Food", "10", Currency::Eur),
            row("03.07.2025", "Food", "50", Currency::Cny),
        ];
        let (stats, _) = aggregator(FakeRates::new().with(Currency::Eur, Currency::Rub, d("100")));
        let err = stats
            .aggregate(&rows, &all(Period::Month(None)), Grouping::ConvertTo(Currency::Rub))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::RateUnavailable { from: Currency::Cny, .. }));
    }

    #[tokio::test]
    async fn test_rates_are_memoized_across_month_sections() {
        let rows = vec![
            row("01.05.2025", "Food", "1", Currency::Eur),
            row("01.06.2025", "Food", "2", Currency::Eur),
            row("01.07.2025", "Food", "3", Currency::Eur),
        ];
        let (stats, rates) = aggregator(FakeRates::new().with(Currency::Eur, Currency::Rsd, d("117")));
        let result = stats
            .aggregate(&rows, &all(Period::Month(None)), Grouping::ConvertTo(Currency::Rsd))
            .await
            .unwrap();
        assert_eq!(result.sections.len(), 3);
        assert_eq!(rates.calls(), 1);
    }

    #[tokio::test]
    async fn test_last_n_picks_newest_regardless_of_storage_order() {
        let rows = vec![
            row("03.07.2025", "Food", "3", Currency::Rub),
            row("05.07.2025", "Food", "5", Currency::Rub),
            row("01.07.2025", "Food", "1", Currency::Rub),
            row("04.07.2025", "Food", "4", Currency::Rub),
            row("02.07.2025", "Food", "2", Currency::Rub),
        ];
        let (stats, _) = aggregator(FakeRates::new());
        let result = stats
            .aggregate(&rows, &all(Period::LastN(3)), Grouping::ByCurrency)
            .await
            .unwrap();

        let amounts: Vec<Decimal> = result.recent.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![d("5"), d("4"), d("3")]);
        assert_eq!(totals(&result)[&Currency::Rub].total, d("12"));
        assert_eq!(result.record_count, 3);
    }

    #[tokio::test]
    async fn test_last_n_ties_prefer_later_rows() {
        let rows = vec![
            row("05.07.2025", "Food", "1", Currency::Rub),
            row("05.07.2025", "Food", "2", Currency::Rub),
        ];
        let (stats, _) = aggregator(FakeRates::new());
        let result = stats
            .aggregate(&rows, &all(Period::LastN(1)), Grouping::ByCurrency)
            .await
            .unwrap();
        assert_eq!(result.recent[0].amount, d("2"));
    }

    #[tokio::test]
    async fn test_range_is_inclusive_and_category_exact() {
        let rows = vec![
            row("30.06.2025", "Food", "1", Currency::Rub),
            row("01.07.2025", "Food", "2", Currency::Rub),
            row("15.07.2025", "food", "4", Currency::Rub),
            row("31.07.2025", "Food", "8", Currency::Rub),
            row("01.08.2025", "Food", "16", Currency::Rub),
        ];
        let filter = StatsFilter {
            category: Some("Food".into()),
            period: Period::Range {
                start: date("01.07.2025"),
                end: date("31.07.2025"),
            },
        };
        let (stats, _) = aggregator(FakeRates::new());
        let result = stats.aggregate(&rows, &filter, Grouping::ByCurrency).await.unwrap();
        assert_eq!(totals(&result)[&Currency::Rub].total, d("10"));
        assert_eq!(result.record_count, 2);
        assert!(result.recent.is_empty());
    }

    #[tokio::test]
    async fn test_all_months_are_ordered_subtotals() {
        let rows = vec![
            row("10.07.2025", "Food", "7", Currency::Rub),
            row("10.05.2025", "Food", "5", Currency::Rub),
            row("11.07.2025", "Food", "1", Currency::Rub),
            row("10.06.2025", "Food", "6", Currency::Eur),
        ];
        let (stats, _) = aggregator(FakeRates::new());
        let result = stats
            .aggregate(&rows, &all(Period::Month(None)), Grouping::ByCurrency)
            .await
            .unwrap();

        let months: Vec<String> = result
            .sections
            .iter()
            .map(|s| s.month.unwrap().to_string())
            .collect();
        assert_eq!(months, vec!["2025-05", "2025-06", "2025-07"]);
        assert_eq!(result.sections[2].count, 2);
        assert_eq!(result.record_count, 4);
    }

    #[tokio::test]
    async fn test_results_are_reproducible() {
        let rows = vec![
            row("01.07.2025", "Food", "0.1", Currency::Eur),
            row("02.07.2025", "Food", "0.2", Currency::Eur),
            row("03.07.2025", "Food", "33.333", Currency::Rsd),
        ];
        let rates = FakeRates::new().with(Currency::Rsd, Currency::Eur, d("0.0085"));
        let (stats, _) = aggregator(rates);
        let filter = all(Period::Month(None));
        let first = stats.aggregate(&rows, &filter, Grouping::ConvertTo(Currency::Eur)).await.unwrap();
        let second = stats.aggregate(&rows, &filter, Grouping::ConvertTo(Currency::Eur)).await.unwrap();
        assert_eq!(first, second);

        let Summary::Converted { total, .. } = &first.sections[0].summary else {
            panic!("expected a converted summary");
        };
        // 0.1 + 0.2 + 33.333 * 0.0085 with no binary float drift
        assert_eq!(*total, d("0.5833305"));
    }

    #[tokio::test]
    async fn test_render_rounds_only_for_display() {
        let rows = vec![
            row("01.07.2025", "Food", "100", Currency::Rub),
            row("02.07.2025", "Food", "10", Currency::Eur),
        ];
        let (stats, _) = aggregator(FakeRates::new().with(Currency::Eur, Currency::Rub, d("93.125")));
        let result = stats
            .aggregate(&rows, &all(Period::Month(Some(YearMonth::of(date("01.07.2025"))))), Grouping::ConvertTo(Currency::Rub))
            .await
            .unwrap();

        let text = result.render();
        assert!(text.contains("Total: 1031.25 RUB"), "{text}");
        assert!(text.contains("10.00 EUR × 93.125 = 931.25 RUB"), "{text}");
        assert!(text.ends_with("Records: 2"), "{text}");
    }

    #[tokio::test]
    async fn test_render_empty_selection() {
        let (stats, _) = aggregator(FakeRates::new());
        let result = stats
            .aggregate(&[], &all(Period::LastN(3)), Grouping::ByCurrency)
            .await
            .unwrap();
        assert!(result.render().contains("No data"));
    }
}
