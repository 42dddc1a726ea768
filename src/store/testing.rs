//! Store doubles for tests.

use super::ScheduleStore;
use crate::schedule::{ScheduleQuery, ScheduleRow};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Store whose every read fails, counting attempts.
#[derive(Default)]
pub struct FailingStore {
    pub reads: AtomicUsize,
}

#[async_trait]
impl ScheduleStore for FailingStore {
    fn backend(&self) -> &'static str {
        "failing"
    }

    async fn fetch_active(&self, _query: &ScheduleQuery) -> Result<Vec<ScheduleRow>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("connection reset"))
    }
}
