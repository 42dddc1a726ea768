//! Message bus capability and the device schedule publisher.
//!
//! A dispatch opens one [`BusSession`], publishes once with the transport's
//! strongest delivery guarantee, and closes the session again. Sessions are
//! never pooled.

mod mqtt;
mod nats;
mod publisher;
#[cfg(test)]
pub(crate) mod testing;

pub use mqtt::MqttConnector;
pub use nats::{nats_subject, NatsConnector};
pub use publisher::DevicePublisher;

use crate::config::BusConfig;
use crate::event::DeviceId;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Topic prefix devices subscribe under: `system/schedule/<device_id>`
pub const TOPIC_PREFIX: &str = "system/schedule";

/// Topic carrying the schedule set of one device.
pub fn device_topic(device_id: &DeviceId) -> String {
    format!("{}/{}", TOPIC_PREFIX, device_id)
}

/// Opens transient sessions to a message broker.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Transport name used in logs.
    fn transport(&self) -> &'static str;

    /// Establishes a fresh connection. Fails if the broker is unreachable or
    /// refuses the connection.
    async fn connect(&self) -> Result<Box<dyn BusSession>>;
}

/// One live broker connection.
#[async_trait]
pub trait BusSession: Send {
    /// Publishes `payload` to `topic` and returns once the broker has
    /// confirmed the handoff.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Disconnects. Called exactly once per session.
    async fn close(&mut self) -> Result<()>;
}

/// Builds the connector named by `config.url`.
///
/// - `mqtt://` / `tcp://`: MQTT 3.1.1, QoS 2
/// - `nats://`: NATS JetStream, publish awaits the stream ack. The stream is
///   created here if it does not exist yet.
pub async fn open_bus(config: &BusConfig) -> Result<Arc<dyn BusConnector>> {
    let url = Url::parse(&config.url)
        .with_context(|| format!("Invalid bus URL '{}'", config.url))?;

    match url.scheme() {
        "mqtt" | "tcp" => {
            let connector =
                MqttConnector::from_url(&url, Duration::from_secs(config.keep_alive_secs))?;
            info!(broker = %connector.address(), "Using MQTT bus");
            Ok(Arc::new(connector))
        }
        "nats" => {
            let connector = NatsConnector::new(&config.url, &config.nats_stream);
            connector.ensure_stream().await?;
            info!(url = %config.url, stream = %config.nats_stream, "Using NATS JetStream bus");
            Ok(Arc::new(connector))
        }
        other => bail!(
            "Unsupported bus scheme '{}': expected mqtt://, tcp:// or nats://",
            other
        ),
    }
}
