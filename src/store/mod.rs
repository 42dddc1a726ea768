//! Read capability over the `schedules` table.
//!
//! Backends evaluate the activation filter server-side and return rows in
//! their natural order.

mod postgrest;
mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub use postgrest::PostgrestStore;
pub use sqlite::SqliteStore;

use crate::config::StoreConfig;
use crate::schedule::{ScheduleQuery, ScheduleRow};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Store able to answer "which schedules are active for this device".
///
/// Active means `is_repeat = true OR (is_repeat = false AND last_ran_at IS NULL)`,
/// expressed as one compound predicate in a single read.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Backend name used in logs.
    fn backend(&self) -> &'static str;

    /// Selects `schedule, action, is_repeat` of the active rows for
    /// `query.device_id`.
    async fn fetch_active(&self, query: &ScheduleQuery) -> Result<Vec<ScheduleRow>>;
}

/// Opens the store named by `config.endpoint`.
///
/// - `http://` / `https://`: PostgREST row API (`<endpoint>/rest/v1`)
/// - `sqlite://<path>` or `sqlite::memory:`: embedded SQLite database
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ScheduleStore>> {
    let endpoint = config.endpoint.as_str();

    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        info!(endpoint = %endpoint, "Using PostgREST schedule store");
        let store = PostgrestStore::new(endpoint, &config.key)
            .context("Failed to build PostgREST client")?;
        return Ok(Arc::new(store));
    }

    if let Some(path) = sqlite_path(endpoint) {
        info!(path = %path, "Using SQLite schedule store");
        let store = SqliteStore::new(path)?;
        return Ok(Arc::new(store));
    }

    bail!(
        "Unsupported store endpoint '{}': expected http(s):// or sqlite://",
        endpoint
    )
}

fn sqlite_path(endpoint: &str) -> Option<&str> {
    endpoint
        .strip_prefix("sqlite://")
        .or_else(|| endpoint.strip_prefix("sqlite:"))
        .filter(|path| !path.is_empty())
}
