use super::{ChangeEvent, DeviceId};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Which side of a change event a validation failure refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordSide {
    Record,
    OldRecord,
}

impl RecordSide {
    fn key(self) -> &'static str {
        match self {
            RecordSide::Record => "record",
            RecordSide::OldRecord => "old_record",
        }
    }
}

impl fmt::Display for RecordSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Validation errors for change event bodies
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("invalid body: {0}")]
    Malformed(String),
    #[error("invalid body: expected a JSON object")]
    NotAnObject,
    #[error("invalid body: record or old_record is required")]
    MissingRecord,
    #[error("invalid body: {0} must be an object")]
    RecordNotObject(RecordSide),
    #[error("invalid body: {0}.device_id must be a string")]
    DeviceIdNotString(RecordSide),
    #[error("invalid body: {0}.device_id must not be empty")]
    EmptyDeviceId(RecordSide),
}

/// Decodes a change event body.
///
/// Validation order:
/// - body must be a JSON object
/// - at least one of `record` / `old_record` must be present (missing and
///   `null` both count as absent)
/// - every present side must be an object with a non-empty string `device_id`
pub fn parse_change_event(body: &Value) -> Result<ChangeEvent, EventError> {
    let body = body.as_object().ok_or(EventError::NotAnObject)?;

    let new_side = side_device_id(body, RecordSide::Record)?;
    let old_side = side_device_id(body, RecordSide::OldRecord)?;

    match (new_side, old_side) {
        (Some(device_id), Some(old_device_id)) => Ok(ChangeEvent::Both {
            device_id,
            old_device_id,
        }),
        (Some(device_id), None) => Ok(ChangeEvent::NewState { device_id }),
        (None, Some(device_id)) => Ok(ChangeEvent::OldState { device_id }),
        (None, None) => Err(EventError::MissingRecord),
    }
}

fn side_device_id(
    body: &Map<String, Value>,
    side: RecordSide,
) -> Result<Option<DeviceId>, EventError> {
    let record = match body.get(side.key()) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(record)) => record,
        Some(_) => return Err(EventError::RecordNotObject(side)),
    };

    match record.get("device_id") {
        Some(Value::String(id)) if id.is_empty() => Err(EventError::EmptyDeviceId(side)),
        Some(Value::String(id)) => Ok(Some(DeviceId(id.clone()))),
        _ => Err(EventError::DeviceIdNotString(side)),
    }
}
