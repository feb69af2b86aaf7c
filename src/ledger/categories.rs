//! Category list cache backed by the config sheet.

use chrono::Utc;
use cron::Schedule;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::ledger::error::Result;
use crate::ledger::sheets::Sheet;

/// An expense category as listed in the config sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Find a category by exact name.
pub fn find<'a>(categories: &'a [Category], name: &str) -> Option<&'a Category> {
    categories.iter().find(|c| c.name == name)
}

/// Cached category snapshot.
///
/// Readers get an `Arc` to an immutable list, so a refresh never exposes a
/// half-built snapshot. Refreshes are serialized through `writer`.
pub struct CategoryCache {
    sheet: Arc<dyn Sheet>,
    snapshot: RwLock<Option<Arc<[Category]>>>,
    writer: Mutex<()>,
}

impl CategoryCache {
    pub fn new(sheet: Arc<dyn Sheet>) -> Self {
        Self {
            sheet,
            snapshot: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    /// Current snapshot without touching the sheet.
    pub fn snapshot(&self) -> Option<Arc<[Category]>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last loaded snapshot, or a blocking load if nothing was loaded yet.
    pub async fn get(&self) -> Result<Arc<[Category]>> {
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }
        let _writer = self.writer.lock().await;
        // Another caller may have loaded it while we waited.
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }
        self.load().await
    }

    /// Fetch a fresh list. On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<Arc<[Category]>> {
        let _writer = self.writer.lock().await;
        self.load().await
    }

    async fn load(&self) -> Result<Arc<[Category]>> {
        let names = match self.sheet.read_categories().await {
            Ok(names) => names,
            Err(e) => {
                warn!("Category refresh failed, keeping previous list: {e}");
                return Err(e);
            }
        };

        let categories: Arc<[Category]> = dedupe(names).into();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(categories.clone());
        info!("📂 Loaded {} categories", categories.len());
        Ok(categories)
    }
}

/// Trim, drop blanks, and keep the first occurrence of each name.
fn dedupe(names: Vec<String>) -> Vec<Category> {
    let mut categories: Vec<Category> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if name.is_empty() || find(&categories, name).is_some() {
            continue;
        }
        categories.push(Category::new(name));
    }
    categories
}

/// Refresh the cache on a cron schedule (7-field `cron` crate syntax).
pub fn spawn_scheduled_refresh(cache: Arc<CategoryCache>, schedule: Schedule) {
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Category refresh schedule has no future runs, stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            if let Err(e) = cache.refresh().await {
                warn!("Scheduled category refresh failed: {e}");
            }
        }
    });
}
