use crate::event::EventError;
use thiserror::Error;

/// Terminal failure of one dispatch invocation.
///
/// None of these are retried. Either the full current schedule set reaches
/// the broker, or nothing is published.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The trigger body did not carry a usable device identity.
    #[error("{0}")]
    InvalidEvent(#[from] EventError),

    /// The schedule store rejected or failed the read.
    #[error("schedule query failed: {0:#}")]
    Query(anyhow::Error),

    /// The bus connection could not be established.
    #[error("bus connection failed: {0:#}")]
    Connect(anyhow::Error),

    /// The broker rejected the publish or never confirmed it.
    #[error("publish failed: {0:#}")]
    Publish(anyhow::Error),
}

impl DispatchError {
    /// Short stable name used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::InvalidEvent(_) => "invalid_event",
            DispatchError::Query(_) => "query",
            DispatchError::Connect(_) => "connect",
            DispatchError::Publish(_) => "publish",
        }
    }
}
