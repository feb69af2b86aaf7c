//! Conversation engine: per-chat sessions around the dialog state machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::ledger::categories::{self, Category, CategoryCache};
use crate::ledger::currency::Currency;
use crate::ledger::dialog::{self, AddStep, DialogContext, Draft, Flow, InputEvent, Reply, StatsQuery, StatsStep, Transition};
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::expense::{Calendar, DATE_FORMAT, format_amount, parse_rows};
use crate::ledger::rates::RateSource;
use crate::ledger::recorder::ExpenseRecorder;
use crate::ledger::sheets::Sheet;
use crate::ledger::stats::StatsAggregator;
use crate::ledger::users::{User, UserRegistry};

/// Data rows start below the header row.
const DATA_RANGE: &str = "A2:G";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Inactivity after which a dialog is dropped.
    pub timeout: Duration,
    pub last_n: usize,
    pub currencies: Vec<Currency>,
    pub data_sheet: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15 * 60),
            last_n: 3,
            currencies: vec![Currency::Rub, Currency::Rsd, Currency::Eur],
            data_sheet: "Data".to_string(),
        }
    }
}

/// One live dialog.
struct ConversationState {
    chat_id: i64,
    flow: Flow,
    /// Category list as of flow start; not re-read mid-flow.
    categories: Arc<[Category]>,
    created_at: Instant,
    last_activity: Instant,
}

pub struct ConversationEngine {
    settings: EngineSettings,
    users: Arc<UserRegistry>,
    categories: Arc<CategoryCache>,
    sheet: Arc<dyn Sheet>,
    recorder: ExpenseRecorder,
    stats: StatsAggregator,
    calendar: Calendar,
    /// Never held across an await.
    sessions: Mutex<HashMap<i64, ConversationState>>,
    /// Per-chat FIFO lock: one input is processed at a time per chat.
    turns: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationEngine {
    pub fn new(
        settings: EngineSettings,
        users: Arc<UserRegistry>,
        sheet: Arc<dyn Sheet>,
        categories: Arc<CategoryCache>,
        rates: Arc<dyn RateSource>,
        calendar: Calendar,
    ) -> Self {
        let recorder = ExpenseRecorder::new(
            sheet.clone(),
            categories.clone(),
            calendar,
            settings.currencies.clone(),
        );
        Self {
            settings,
            users,
            categories,
            sheet,
            recorder,
            stats: StatsAggregator::new(rates),
            calendar,
            sessions: Mutex::new(HashMap::new()),
            turns: Mutex::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Process one input from `chat_id`.
    pub async fn handle(&self, chat_id: i64, input: InputEvent) -> Reply {
        let Some(user) = self.users.lookup(chat_id) else {
            return self.unregistered(chat_id);
        };
        let turn = self.turn(chat_id);
        let _turn = turn.lock().await;

        if let InputEvent::Choice(key) = &input {
            match key.as_str() {
                "menu:add" => return self.begin(chat_id, Flow::add()).await,
                "menu:stats" => return self.begin(chat_id, Flow::stats()).await,
                _ => {}
            }
        }

        let state = match self.session(chat_id) {
            Ok(Some(state)) => state,
            Ok(None) | Err(LedgerError::StateExpired) => return dialog::menu(),
            Err(e) => {
                warn!("Session lookup failed for {chat_id}: {e}");
                return dialog::menu();
            }
        };

        let ctx = self.context(&state.categories);
        match dialog::transition(&state.flow, &input, &ctx) {
            Transition::Next(flow, reply) => {
                debug!("chat {chat_id}: {:?} -> {:?}", state.flow, flow);
                self.store(chat_id, flow, state.categories);
                reply
            }
            Transition::Cancelled => {
                self.discard(chat_id);
                cancelled()
            }
            Transition::Commit(draft) => self.commit(chat_id, &user, state, draft).await,
            Transition::Query(query) => self.query(chat_id, state, query).await,
        }
    }

    /// Main menu. Abandons any dialog in progress.
    pub async fn menu(&self, chat_id: i64) -> Reply {
        if self.users.lookup(chat_id).is_none() {
            return self.unregistered(chat_id);
        }
        let turn = self.turn(chat_id);
        let _turn = turn.lock().await;
        self.discard(chat_id);
        dialog::menu()
    }

    /// `/help`: the command list above the main menu. Abandons any dialog too.
    pub async fn help(&self, chat_id: i64, commands: &str) -> Reply {
        let menu = self.menu(chat_id).await;
        Reply::text(format!("{commands}\n\n{}", menu.text)).with_choices(menu.choices)
    }

    pub async fn start_add(&self, chat_id: i64) -> Reply {
        self.start(chat_id, Flow::add()).await
    }

    pub async fn start_stats(&self, chat_id: i64) -> Reply {
        self.start(chat_id, Flow::stats()).await
    }

    pub async fn cancel(&self, chat_id: i64) -> Reply {
        if self.users.lookup(chat_id).is_none() {
            return self.unregistered(chat_id);
        }
        let turn = self.turn(chat_id);
        let _turn = turn.lock().await;
        if self.discard(chat_id) {
            cancelled()
        } else {
            Reply::text("Nothing to cancel.").with_choices(dialog::menu().choices)
        }
    }

    /// `/register <name>`.
    pub async fn register(&self, chat_id: i64, name: &str) -> Reply {
        match self.users.register(chat_id, name) {
            Ok(user) => Reply::text(format!("👋 Welcome, {}!", user.display_name))
                .with_choices(dialog::menu().choices),
            Err(e) => Reply::text(format!("⚠️ {}", capitalize(&e.to_string()))),
        }
    }

    /// `/reloadcats`: refresh categories and list them.
    pub async fn reload_categories(&self, chat_id: i64) -> Reply {
        if self.users.lookup(chat_id).is_none() {
            return self.unregistered(chat_id);
        }
        match self.categories.refresh().await {
            Ok(list) if list.is_empty() => Reply::text("🔄 Reloaded, but the Config sheet lists no categories."),
            Ok(list) => {
                let names: Vec<&str> = list.iter().map(|c| c.name.as_str()).collect();
                Reply::text(format!("🔄 Categories ({}): {}", names.len(), names.join(", ")))
            }
            Err(e) => Reply::text(format!("⚠️ Reload failed, keeping the previous list: {e}")),
        }
    }

    /// Whether `chat_id` has a live (not timed out) dialog.
    pub fn has_session(&self, chat_id: i64) -> bool {
        matches!(self.session(chat_id), Ok(Some(_)))
    }

    // =========================================================================
    // Flow completion
    // =========================================================================

    async fn start(&self, chat_id: i64, flow: Flow) -> Reply {
        if self.users.lookup(chat_id).is_none() {
            return self.unregistered(chat_id);
        }
        let turn = self.turn(chat_id);
        let _turn = turn.lock().await;
        self.begin(chat_id, flow).await
    }

    /// Start `flow`, replacing whatever dialog the chat had.
    async fn begin(&self, chat_id: i64, flow: Flow) -> Reply {
        let categories = match self.categories.get().await {
            Ok(list) => list,
            Err(e) => {
                return Reply::text(format!("⚠️ Can't load categories right now ({e}). Try again in a bit."));
            }
        };
        if matches!(flow, Flow::AddExpense(_)) && categories.is_empty() {
            return Reply::text("⚠️ The Config sheet lists no categories. Add some, then send /reloadcats.");
        }

        info!("💬 chat {chat_id}: starting {}", flow_name(&flow));
        let reply = dialog::prompt(&flow, &self.context(&categories));
        self.discard(chat_id);
        self.store(chat_id, flow, categories);
        reply
    }

    async fn commit(&self, chat_id: i64, user: &User, state: ConversationState, draft: Draft) -> Reply {
        let result = self
            .recorder
            .record_on(
                draft.date,
                user,
                &draft.category,
                draft.amount,
                draft.currency,
                draft.comment.as_deref(),
            )
            .await;

        match result {
            Ok(id) => {
                self.discard(chat_id);
                debug!("chat {chat_id}: saved at {id}");
                Reply::text(format!(
                    "✅ Saved: {} {} {} on {}",
                    draft.category,
                    format_amount(draft.amount),
                    draft.currency,
                    draft.date.format(DATE_FORMAT)
                ))
                .with_choices(dialog::menu().choices)
            }
            Err(LedgerError::Validation(msg)) => {
                // The category may have been removed since the flow started.
                let fresh = self.categories.refresh().await.ok().or_else(|| self.categories.snapshot());
                if let Some(fresh) = fresh
                    && categories::find(&fresh, &draft.category).is_none()
                {
                    info!("chat {chat_id}: category '{}' is gone, restarting", draft.category);
                    let flow = Flow::AddExpense(AddStep::AwaitCategory);
                    let reply = dialog::prompt(&flow, &self.context(&fresh))
                        .with_hint(format!("Category '{}' no longer exists, pick another", draft.category));
                    self.store(chat_id, flow, fresh);
                    return reply;
                }
                self.hold(chat_id, state, msg)
            }
            Err(e) => {
                warn!("chat {chat_id}: failed to save expense: {e}");
                self.hold(chat_id, state, format!("Couldn't save ({e}). Press Save to try again"))
            }
        }
    }

    async fn query(&self, chat_id: i64, state: ConversationState, query: StatsQuery) -> Reply {
        let raw = match self.sheet.read_range(&self.settings.data_sheet, DATA_RANGE).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("chat {chat_id}: failed to read expenses: {e}");
                return self.hold(chat_id, state, format!("Couldn't read the spreadsheet ({e}). Try again"));
            }
        };
        let parsed = parse_rows(&raw);

        match self.stats.aggregate(&parsed.rows, &query.filter, query.grouping).await {
            Ok(result) => {
                self.discard(chat_id);
                let mut text = result.render();
                if parsed.skipped > 0 {
                    text.push_str(&format!("\n⚠️ {} unreadable row(s) in the sheet were skipped", parsed.skipped));
                }
                Reply::text(text).with_choices(dialog::menu().choices)
            }
            Err(e @ LedgerError::RateUnavailable { .. }) => {
                warn!("chat {chat_id}: conversion failed: {e}");
                let flow = Flow::Stats(StatsStep::AwaitGrouping {
                    scope: query.filter.category,
                    period: query.filter.period,
                });
                let reply = dialog::prompt(&flow, &self.context(&state.categories))
                    .with_hint(format!("{}. Try again or total by currency", capitalize(&e.to_string())));
                self.store(chat_id, flow, state.categories);
                reply
            }
            Err(e) => self.hold(chat_id, state, e.to_string()),
        }
    }

    /// Stay at the current step and prompt it again with `hint`.
    fn hold(&self, chat_id: i64, state: ConversationState, hint: String) -> Reply {
        let reply = dialog::prompt(&state.flow, &self.context(&state.categories)).with_hint(hint);
        self.store(chat_id, state.flow, state.categories);
        reply
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    #[cfg(test)]
    pub(crate) fn turn_count(&self) -> usize {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<i64, ConversationState>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Turn lock for a registered chat. Unregistered chats never get one, so
    /// the map stays bounded by the family.
    fn turn(&self, chat_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chat_id)
            .or_default()
            .clone()
    }

    /// Live state for `chat_id`. A stale state is removed and reported as
    /// [`LedgerError::StateExpired`].
    fn session(&self, chat_id: i64) -> Result<Option<ConversationState>> {
        let mut sessions = self.sessions();
        let Some(state) = sessions.get(&chat_id) else {
            return Ok(None);
        };
        if state.last_activity.elapsed() >= self.settings.timeout {
            debug!(
                "chat {chat_id}: dropping {} idle since {:?}",
                flow_name(&state.flow),
                state.last_activity.elapsed()
            );
            sessions.remove(&chat_id);
            return Err(LedgerError::StateExpired);
        }
        Ok(Some(ConversationState {
            chat_id: state.chat_id,
            flow: state.flow.clone(),
            categories: state.categories.clone(),
            created_at: state.created_at,
            last_activity: state.last_activity,
        }))
    }

    /// Insert or replace the chat's dialog. Keeps `created_at` while the same
    /// flow continues.
    fn store(&self, chat_id: i64, flow: Flow, categories: Arc<[Category]>) {
        let now = Instant::now();
        let mut sessions = self.sessions();
        let created_at = sessions
            .get(&chat_id)
            .filter(|s| same_flow(&s.flow, &flow))
            .map(|s| s.created_at)
            .unwrap_or(now);
        sessions.insert(
            chat_id,
            ConversationState {
                chat_id,
                flow,
                categories,
                created_at,
                last_activity: now,
            },
        );
    }

    fn discard(&self, chat_id: i64) -> bool {
        self.sessions().remove(&chat_id).is_some()
    }

    fn context<'a>(&'a self, categories: &'a [Category]) -> DialogContext<'a> {
        DialogContext {
            categories,
            currencies: &self.settings.currencies,
            last_n: self.settings.last_n,
            today: self.calendar.today(),
        }
    }

    fn unregistered(&self, chat_id: i64) -> Reply {
        if self.users.registration_open() {
            Reply::text("👋 I don't know you yet. Send /register <your name> to start logging expenses.")
        } else {
            Reply::text(format!(
                "👋 I don't know you yet. Ask the admin to add chat id {chat_id} to the config."
            ))
        }
    }
}

fn cancelled() -> Reply {
    Reply::text("❌ Cancelled.").with_choices(dialog::menu().choices)
}

fn flow_name(flow: &Flow) -> &'static str {
    match flow {
        Flow::AddExpense(_) => "add-expense",
        Flow::Stats(_) => "statistics",
    }
}

fn same_flow(a: &Flow, b: &Flow) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
