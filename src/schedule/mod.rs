use crate::error::DispatchError;
use crate::event::DeviceId;
use crate::store::ScheduleStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;


/// A persisted schedule row as owned by the store.
///
/// `schedule` and `action` are opaque to this service and passed through
/// unmodified. A row is *active* when it repeats, or when it is a one-shot
/// that has never run (`last_ran_at` is null).
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleEntry {
    pub device_id: String,
    pub schedule: Value,
    pub action: Value,
    pub is_repeat: bool,
    pub last_ran_at: Option<DateTime<Utc>>,
}

/// The projection selected from the store: `schedule, action, is_repeat`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ScheduleRow {
    pub schedule: Value,
    pub action: Value,
    pub is_repeat: bool,
}

/// One schedule as the device sees it on the wire.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DispatchEntry {
    pub schedule: Value,
    pub action: Value,
    #[serde(rename = "isRepeat")]
    pub is_repeat: bool,
}

impl From<ScheduleRow> for DispatchEntry {
    fn from(row: ScheduleRow) -> Self {
        Self {
            schedule: row.schedule,
            action: row.action,
            is_repeat: row.is_repeat,
        }
    }
}

/// Full active schedule set for one device: `{"schedules": [...]}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DispatchPayload {
    pub schedules: Vec<DispatchEntry>,
}

impl DispatchPayload {
    /// Builds the payload keeping the store's row order.
    pub fn from_rows(rows: Vec<ScheduleRow>) -> Self {
        Self {
            schedules: rows.into_iter().map(DispatchEntry::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// Compact JSON body published to the device topic.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Read request for one device's active schedules.
#[derive(Clone, Debug)]
pub struct ScheduleQuery {
    pub device_id: DeviceId,
    /// Caller's `Authorization` header, forwarded so row-level access
    /// control applies to whoever triggered the change.
    pub caller_auth: Option<String>,
}

impl ScheduleQuery {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            caller_auth: None,
        }
    }

    pub fn with_caller_auth(mut self, caller_auth: Option<String>) -> Self {
        self.caller_auth = caller_auth;
        self
    }
}

/// Reads the active schedule set for a device and projects it for dispatch.
///
/// The activation filter is evaluated by the store in a single read. A store
/// error aborts with [`DispatchError::Query`]; an empty result is a valid,
/// publishable set.
pub async fn resolve_active_schedules(
    store: &dyn ScheduleStore,
    query: &ScheduleQuery,
) -> Result<DispatchPayload, DispatchError> {
    let rows = store
        .fetch_active(query)
        .await
        .map_err(DispatchError::Query)?;

    debug!(
        device_id = %query.device_id,
        count = rows.len(),
        backend = store.backend(),
        "Resolved active schedules"
    );

    Ok(DispatchPayload::from_rows(rows))
}
