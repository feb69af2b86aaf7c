//! Dialog steps and the pure transition function.
//!
//! Given the current step, one input and the read-only context of the
//! conversation, [`transition`] decides the next step and what to say. It
//! never touches the sheet, the rate source or the chat; completed flows are
//! handed back to the engine as [`Transition::Commit`] or [`Transition::Query`].

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use crate::ledger::categories::Category;
use crate::ledger::currency::Currency;
use crate::ledger::error::LedgerError;
use crate::ledger::expense::{DATE_FORMAT, YearMonth, format_amount, parse_amount, parse_day};
use crate::ledger::stats::{Grouping, Period, StatsFilter};

/// How many months the month picker offers.
const MONTH_CHOICES: usize = 12;

/// Two day-shaped tokens (`1.7`, `01.07.2025`, `2025-07-01`) around a
/// dash or `..`. Each side is anchored to a date shape so dashes inside ISO
/// dates are never taken for the separator.
static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,4}[.-]\d{1,2}(?:[.-]\d{2,4})?)\s*(?:-|–|—|\.\.)\s*(\d{1,4}[.-]\d{1,2}(?:[.-]\d{2,4})?)\s*$")
        .unwrap()
});

/// One user input: typed text or a pressed button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Text(String),
    Choice(String),
}

impl InputEvent {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn choice(key: impl Into<String>) -> Self {
        Self::Choice(key.into())
    }
}

/// A button offered with a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption {
    pub key: String,
    pub label: String,
}

impl ChoiceOption {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// What the bot says back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub choices: Vec<ChoiceOption>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
        }
    }

    pub fn with_choices(mut self, choices: Vec<ChoiceOption>) -> Self {
        self.choices = choices;
        self
    }

    /// Prefix the prompt with a warning line.
    pub fn with_hint(mut self, hint: impl AsRef<str>) -> Self {
        self.text = format!("⚠️ {}\n\n{}", hint.as_ref(), self.text);
        self
    }
}

/// A fully collected expense waiting for confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub category: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub comment: Option<String>,
    pub date: NaiveDate,
}

impl Draft {
    fn summary(&self) -> String {
        format!(
            "Category: {}\nAmount: {} {}\nDate: {}\nComment: {}",
            self.category,
            format_amount(self.amount),
            self.currency,
            self.date.format(DATE_FORMAT),
            self.comment.as_deref().unwrap_or("—")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddStep {
    AwaitCategory,
    AwaitAmount {
        category: String,
    },
    AwaitCurrency {
        category: String,
        amount: Decimal,
    },
    AwaitComment {
        category: String,
        amount: Decimal,
        currency: Currency,
    },
    Confirm(Draft),
    AwaitDate(Draft),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKind {
    Range,
    Month,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsStep {
    AwaitCategoryScope,
    AwaitPeriodType {
        scope: Option<String>,
    },
    AwaitPeriodParams {
        scope: Option<String>,
        kind: PeriodKind,
    },
    AwaitGrouping {
        scope: Option<String>,
        period: Period,
    },
    AwaitTargetCurrency {
        scope: Option<String>,
        period: Period,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    AddExpense(AddStep),
    Stats(StatsStep),
}

impl Flow {
    pub fn add() -> Self {
        Flow::AddExpense(AddStep::AwaitCategory)
    }

    pub fn stats() -> Self {
        Flow::Stats(StatsStep::AwaitCategoryScope)
    }
}

/// Read-only facts a transition may consult.
pub struct DialogContext<'a> {
    /// Category snapshot taken when the flow started.
    pub categories: &'a [Category],
    pub currencies: &'a [Currency],
    pub last_n: usize,
    pub today: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsQuery {
    pub filter: StatsFilter,
    pub grouping: Grouping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Stay in the dialog at `Flow` and send the reply.
    Next(Flow, Reply),
    /// Expense confirmed; the engine records it.
    Commit(Draft),
    /// Filters complete; the engine runs the report.
    Query(StatsQuery),
    Cancelled,
}

/// Main menu shown on `/start` and for input outside any dialog.
pub fn menu() -> Reply {
    Reply::text("What would you like to do?").with_choices(vec![
        ChoiceOption::new("menu:add", "➕ Add expense"),
        ChoiceOption::new("menu:stats", "📊 Statistics"),
    ])
}

fn cancel_option() -> ChoiceOption {
    ChoiceOption::new("cancel", "✖️ Cancel")
}

/// Button key for the category at `index`.
///
/// Keys carry a fingerprint of the whole list, so a button left on screen
/// from an older list never resolves against a newer one.
pub fn category_key(categories: &[Category], index: usize) -> String {
    format!("cat:{:08x}:{index}", fingerprint(categories))
}

fn fingerprint(categories: &[Category]) -> u32 {
    let mut hasher = DefaultHasher::new();
    for category in categories {
        category.name.hash(&mut hasher);
    }
    hasher.finish() as u32
}

fn category_options(categories: &[Category]) -> impl Iterator<Item = ChoiceOption> + '_ {
    (0..categories.len()).map(move |i| ChoiceOption::new(category_key(categories, i), categories[i].name.clone()))
}

fn currency_options(currencies: &[Currency]) -> impl Iterator<Item = ChoiceOption> + '_ {
    currencies
        .iter()
        .map(|c| ChoiceOption::new(format!("cur:{c}"), c.code()))
}

fn scope_label(scope: &Option<String>) -> &str {
    scope.as_deref().unwrap_or("All categories")
}

/// Buttons offered at a step. Every step ends with Cancel.
fn options(flow: &Flow, ctx: &DialogContext) -> Vec<ChoiceOption> {
    let mut options: Vec<ChoiceOption> = match flow {
        Flow::AddExpense(AddStep::AwaitCategory) => category_options(ctx.categories).collect(),
        Flow::AddExpense(AddStep::AwaitAmount { .. }) => Vec::new(),
        Flow::AddExpense(AddStep::AwaitCurrency { .. }) => currency_options(ctx.currencies).collect(),
        Flow::AddExpense(AddStep::AwaitComment { .. }) => vec![ChoiceOption::new("skip", "⏭ Skip")],
        Flow::AddExpense(AddStep::Confirm(_)) => vec![
            ChoiceOption::new("save", "✅ Save"),
            ChoiceOption::new("date", "📅 Change date"),
        ],
        Flow::AddExpense(AddStep::AwaitDate(_)) => vec![ChoiceOption::new("today", "Today")],
        Flow::Stats(StatsStep::AwaitCategoryScope) => std::iter::once(ChoiceOption::new("scope:all", "All categories"))
            .chain(category_options(ctx.categories))
            .collect(),
        Flow::Stats(StatsStep::AwaitPeriodType { .. }) => vec![
            ChoiceOption::new("period:last", format!("Last {} entries", ctx.last_n)),
            ChoiceOption::new("period:range", "Date range"),
            ChoiceOption::new("period:month", "By month"),
        ],
        Flow::Stats(StatsStep::AwaitPeriodParams { kind: PeriodKind::Range, .. }) => Vec::new(),
        Flow::Stats(StatsStep::AwaitPeriodParams { kind: PeriodKind::Month, .. }) => {
            std::iter::once(ChoiceOption::new("month:all", "All months"))
                .chain(
                    YearMonth::recent(ctx.today, MONTH_CHOICES)
                        .into_iter()
                        .map(|m| ChoiceOption::new(format!("month:{m}"), m.to_string())),
                )
                .collect()
        }
        Flow::Stats(StatsStep::AwaitGrouping { .. }) => vec![
            ChoiceOption::new("group:currency", "By currency"),
            ChoiceOption::new("group:convert", "Convert to one currency"),
        ],
        Flow::Stats(StatsStep::AwaitTargetCurrency { .. }) => currency_options(ctx.currencies).collect(),
    };
    options.push(cancel_option());
    options
}

/// The prompt for a step, with its buttons.
pub fn prompt(flow: &Flow, ctx: &DialogContext) -> Reply {
    let text = match flow {
        Flow::AddExpense(step) => match step {
            AddStep::AwaitCategory => "🗂 Choose a category:".to_string(),
            AddStep::AwaitAmount { category } => format!("💰 {category}: how much?"),
            AddStep::AwaitCurrency { category, amount } => {
                format!("💱 {category}, {}: which currency?", format_amount(*amount))
            }
            AddStep::AwaitComment { .. } => "💬 Add a comment, or skip:".to_string(),
            AddStep::Confirm(draft) => format!("Save this expense?\n\n{}", draft.summary()),
            AddStep::AwaitDate(_) => "📅 Which day? (DD.MM.YYYY, DD.MM or YYYY-MM-DD)".to_string(),
        },
        Flow::Stats(step) => match step {
            StatsStep::AwaitCategoryScope => "📊 Statistics for which category?".to_string(),
            StatsStep::AwaitPeriodType { scope } => format!("📊 {}: which period?", scope_label(scope)),
            StatsStep::AwaitPeriodParams {
                kind: PeriodKind::Range,
                ..
            } => "📅 Type the range as DD.MM.YYYY - DD.MM.YYYY".to_string(),
            StatsStep::AwaitPeriodParams {
                kind: PeriodKind::Month,
                ..
            } => "📅 Pick a month or type YYYY-MM:".to_string(),
            StatsStep::AwaitGrouping { scope, period } => {
                format!("📊 {} · {}: how to total?", scope_label(scope), period.label())
            }
            StatsStep::AwaitTargetCurrency { .. } => "💱 Convert everything to:".to_string(),
        },
    };
    Reply::text(text).with_choices(options(flow, ctx))
}

/// Compare ignoring case and any leading emoji.
fn same_label(typed: &str, label: &str) -> bool {
    let plain = label.trim_start_matches(|c: char| !c.is_alphanumeric()).trim();
    typed.to_lowercase() == plain.to_lowercase()
}

/// Resolve an input to one of `options`: a button key, or a typed key or label.
fn pick<'a>(input: &InputEvent, options: &'a [ChoiceOption]) -> Option<&'a str> {
    let found = match input {
        InputEvent::Choice(key) => options.iter().find(|o| o.key == *key),
        InputEvent::Text(text) => {
            let typed = text.trim();
            options
                .iter()
                .find(|o| o.key.eq_ignore_ascii_case(typed) || same_label(typed, &o.label))
        }
    };
    found.map(|o| o.key.as_str())
}

fn is_cancel(input: &InputEvent) -> bool {
    match input {
        InputEvent::Choice(key) => key == "cancel",
        InputEvent::Text(text) => text.trim().eq_ignore_ascii_case("cancel"),
    }
}

fn next(flow: Flow, ctx: &DialogContext) -> Transition {
    let reply = prompt(&flow, ctx);
    Transition::Next(flow, reply)
}

fn category_at(key: &str, ctx: &DialogContext) -> Option<String> {
    let (tag, index) = key.strip_prefix("cat:")?.split_once(':')?;
    if u32::from_str_radix(tag, 16).ok()? != fingerprint(ctx.categories) {
        return None;
    }
    let index: usize = index.parse().ok()?;
    ctx.categories.get(index).map(|c| c.name.clone())
}

fn currency_of(key: &str) -> Option<Currency> {
    key.strip_prefix("cur:")?.parse().ok()
}

/// Advance the dialog by one input.
///
/// Invalid input never advances: the same step is prompted again with a hint.
pub fn transition(flow: &Flow, input: &InputEvent, ctx: &DialogContext) -> Transition {
    if is_cancel(input) {
        return Transition::Cancelled;
    }

    let options = options(flow, ctx);
    let picked = pick(input, &options);
    let outcome = match flow {
        Flow::AddExpense(step) => add_expense(step, input, picked, ctx),
        Flow::Stats(step) => stats(step, input, picked, ctx),
    };
    outcome.unwrap_or_else(|hint| Transition::Next(flow.clone(), prompt(flow, ctx).with_hint(hint)))
}

fn add_expense(
    step: &AddStep,
    input: &InputEvent,
    picked: Option<&str>,
    ctx: &DialogContext,
) -> Result<Transition, String> {
    match step {
        AddStep::AwaitCategory => {
            let category = picked
                .and_then(|key| category_at(key, ctx))
                .ok_or("Pick one of the listed categories")?;
            Ok(next(Flow::AddExpense(AddStep::AwaitAmount { category }), ctx))
        }

        AddStep::AwaitAmount { category } => {
            let InputEvent::Text(text) = input else {
                return Err("Type the amount, e.g. 12.50".into());
            };
            let amount = parse_amount(text).map_err(|e| match e {
                LedgerError::Validation(msg) => msg,
                other => other.to_string(),
            })?;
            Ok(next(
                Flow::AddExpense(AddStep::AwaitCurrency {
                    category: category.clone(),
                    amount,
                }),
                ctx,
            ))
        }

        AddStep::AwaitCurrency { category, amount } => {
            let currency = picked
                .and_then(currency_of)
                .ok_or("Pick one of the listed currencies")?;
            Ok(next(
                Flow::AddExpense(AddStep::AwaitComment {
                    category: category.clone(),
                    amount: *amount,
                    currency,
                }),
                ctx,
            ))
        }

        AddStep::AwaitComment {
            category,
            amount,
            currency,
        } => {
            let comment = match (picked, input) {
                (Some("skip"), _) => None,
                (_, InputEvent::Text(text)) => Some(text.trim().to_string()).filter(|c| !c.is_empty()),
                _ => return Err("Type a comment or press Skip".into()),
            };
            let draft = Draft {
                category: category.clone(),
                amount: *amount,
                currency: *currency,
                comment,
                date: ctx.today,
            };
            Ok(next(Flow::AddExpense(AddStep::Confirm(draft)), ctx))
        }

        AddStep::Confirm(draft) => match picked {
            Some("save") => Ok(Transition::Commit(draft.clone())),
            Some("date") => Ok(next(Flow::AddExpense(AddStep::AwaitDate(draft.clone())), ctx)),
            _ => Err("Press Save, Change date or Cancel".into()),
        },

        AddStep::AwaitDate(draft) => {
            let date = match (picked, input) {
                (Some("today"), _) => ctx.today,
                (_, InputEvent::Text(text)) => {
                    parse_day(text, ctx.today).ok_or("Couldn't read that date, try DD.MM.YYYY")?
                }
                _ => return Err("Type a date or press Today".into()),
            };
            if date > ctx.today {
                return Err("The date can't be in the future".into());
            }
            let draft = Draft { date, ..draft.clone() };
            Ok(next(Flow::AddExpense(AddStep::Confirm(draft)), ctx))
        }
    }
}

fn stats(
    step: &StatsStep,
    input: &InputEvent,
    picked: Option<&str>,
    ctx: &DialogContext,
) -> Result<Transition, String> {
    match step {
        StatsStep::AwaitCategoryScope => {
            let scope = match picked {
                Some("scope:all") => None,
                Some(key) => Some(category_at(key, ctx).ok_or("Pick one of the listed categories")?),
                None => return Err("Pick one of the listed categories".into()),
            };
            Ok(next(Flow::Stats(StatsStep::AwaitPeriodType { scope }), ctx))
        }

        StatsStep::AwaitPeriodType { scope } => {
            let scope = scope.clone();
            let flow = match picked {
                Some("period:last") => StatsStep::AwaitGrouping {
                    scope,
                    period: Period::LastN(ctx.last_n),
                },
                Some("period:range") => StatsStep::AwaitPeriodParams {
                    scope,
                    kind: PeriodKind::Range,
                },
                Some("period:month") => StatsStep::AwaitPeriodParams {
                    scope,
                    kind: PeriodKind::Month,
                },
                _ => return Err("Pick one of the listed periods".into()),
            };
            Ok(next(Flow::Stats(flow), ctx))
        }

        StatsStep::AwaitPeriodParams { scope, kind } => {
            let period = match kind {
                PeriodKind::Range => parse_range(input, ctx.today)?,
                PeriodKind::Month => parse_month(input, picked)?,
            };
            Ok(next(
                Flow::Stats(StatsStep::AwaitGrouping {
                    scope: scope.clone(),
                    period,
                }),
                ctx,
            ))
        }

        StatsStep::AwaitGrouping { scope, period } => match picked {
            Some("group:currency") => Ok(Transition::Query(StatsQuery {
                filter: StatsFilter {
                    category: scope.clone(),
                    period: period.clone(),
                },
                grouping: Grouping::ByCurrency,
            })),
            Some("group:convert") => Ok(next(
                Flow::Stats(StatsStep::AwaitTargetCurrency {
                    scope: scope.clone(),
                    period: period.clone(),
                }),
                ctx,
            )),
            _ => Err("Pick how to total the expenses".into()),
        },

        StatsStep::AwaitTargetCurrency { scope, period } => {
            let target = picked
                .and_then(currency_of)
                .ok_or("Pick one of the listed currencies")?;
            Ok(Transition::Query(StatsQuery {
                filter: StatsFilter {
                    category: scope.clone(),
                    period: period.clone(),
                },
                grouping: Grouping::ConvertTo(target),
            }))
        }
    }
}

fn parse_range(input: &InputEvent, today: NaiveDate) -> Result<Period, String> {
    const HINT: &str = "Type the range as DD.MM.YYYY - DD.MM.YYYY";
    let InputEvent::Text(text) = input else {
        return Err(HINT.into());
    };
    let caps = RANGE_RE.captures(text).ok_or(HINT)?;
    let start = parse_day(&caps[1], today).ok_or(HINT)?;
    let end = parse_day(&caps[2], today).ok_or(HINT)?;
    if start > end {
        return Err("The range starts after it ends".into());
    }
    Ok(Period::Range { start, end })
}

fn parse_month(input: &InputEvent, picked: Option<&str>) -> Result<Period, String> {
    const HINT: &str = "Pick a month or type it as YYYY-MM";
    if let Some(key) = picked {
        let month = key.strip_prefix("month:").ok_or(HINT)?;
        if month == "all" {
            return Ok(Period::Month(None));
        }
        return month.parse().map(|m| Period::Month(Some(m))).map_err(|_| HINT.to_string());
    }
    match input {
        InputEvent::Text(text) => text
            .parse::<YearMonth>()
            .map(|m| Period::Month(Some(m)))
            .map_err(|_| HINT.to_string()),
        InputEvent::Choice(_) => Err(HINT.into()),
    }
}
