use super::{device_topic, BusConnector};
use crate::error::DispatchError;
use crate::event::DeviceId;
use crate::schedule::DispatchPayload;
use anyhow::Context;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes a device's resolved schedule set to `system/schedule/<device_id>`.
#[derive(Clone)]
pub struct DevicePublisher {
    connector: Arc<dyn BusConnector>,
}

impl DevicePublisher {
    /// Create a new device publisher
    pub fn new(connector: Arc<dyn BusConnector>) -> Self {
        Self { connector }
    }

    /// Connects, publishes once, and disconnects.
    ///
    /// The session is closed on every path after a successful connect,
    /// including a failed publish. A failed close after a confirmed publish
    /// is only logged. Returns the topic published to.
    pub async fn publish(
        &self,
        device_id: &DeviceId,
        payload: &DispatchPayload,
    ) -> Result<String, DispatchError> {
        let topic = device_topic(device_id);
        let body = payload
            .to_json()
            .context("Failed to serialize schedules to JSON")
            .map_err(DispatchError::Publish)?;

        debug!(
            device_id = %device_id,
            topic = %topic,
            transport = self.connector.transport(),
            count = payload.len(),
            "Publishing schedules"
        );

        let mut session = self
            .connector
            .connect()
            .await
            .map_err(DispatchError::Connect)?;

        let outcome = session.publish(&topic, body).await;

        if let Err(e) = session.close().await {
            warn!(topic = %topic, error = %format!("{:#}", e), "Failed to close bus session");
        }

        outcome.map_err(DispatchError::Publish)?;
        Ok(topic)
    }
}
