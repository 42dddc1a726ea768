use serde_json::Value;
use std::fmt;

mod validation;

pub use validation::{parse_change_event, EventError, RecordSide};

/// Identity of the physical device that owns a schedule row.
///
/// Always a non-empty string; construct through [`ChangeEvent`] decoding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row-level mutation on the `schedules` table, reduced to device identities.
///
/// Inserts and updates carry the new row, deletions only the old row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Only `record` was present (insert, or update without old state).
    NewState { device_id: DeviceId },
    /// Only `old_record` was present (delete).
    OldState { device_id: DeviceId },
    /// Both sides present (update). The new row decides the device.
    Both {
        device_id: DeviceId,
        old_device_id: DeviceId,
    },
}

impl ChangeEvent {
    /// Decodes a raw trigger body.
    pub fn from_value(body: &Value) -> Result<Self, EventError> {
        parse_change_event(body)
    }

    /// The device that should receive the dispatch.
    pub fn device_id(&self) -> &DeviceId {
        match self {
            ChangeEvent::NewState { device_id } => device_id,
            ChangeEvent::OldState { device_id } => device_id,
            ChangeEvent::Both { device_id, .. } => device_id,
        }
    }

    /// Consumes the event, keeping only the authoritative device id.
    pub fn into_device_id(self) -> DeviceId {
        match self {
            ChangeEvent::NewState { device_id }
            | ChangeEvent::OldState { device_id }
            | ChangeEvent::Both { device_id, .. } => device_id,
        }
    }
}

/// Validates a trigger body and returns the device it concerns.
///
/// `record` wins over `old_record` when both are present.
pub fn extract_device_id(body: &Value) -> Result<DeviceId, EventError> {
    parse_change_event(body).map(ChangeEvent::into_device_id)
}
