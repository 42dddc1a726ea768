use super::{BusConnector, BusSession, TOPIC_PREFIX};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use async_trait::async_trait;
use tracing::{debug, info};

/// Maps an MQTT-style topic onto a NATS subject (`/` becomes `.`), the same
/// mapping the NATS server applies to MQTT clients.
pub fn nats_subject(topic: &str) -> String {
    topic.replace('/', ".")
}

/// NATS connector publishing through JetStream.
///
/// A JetStream publish resolves only after the stream has stored the
/// message, which is the confirmed handoff devices rely on.
pub struct NatsConnector {
    url: String,
    stream_name: String,
}

impl NatsConnector {
    pub fn new(url: &str, stream_name: &str) -> Self {
        Self {
            url: url.to_string(),
            stream_name: stream_name.to_string(),
        }
    }

    /// Subjects captured by the schedule stream: `system.schedule.>`
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![format!("{}.>", nats_subject(TOPIC_PREFIX))]
    }

    /// Ensure JetStream stream exists with proper configuration
    pub async fn ensure_stream(&self) -> Result<()> {
        info!("Ensuring JetStream stream '{}' exists", self.stream_name);

        let client = async_nats::connect(&self.url)
            .await
            .context("Failed to connect to NATS")?;
        let jetstream = jetstream::new(client.clone());

        match jetstream.get_stream(&self.stream_name).await {
            Ok(_existing_stream) => {
                info!("Stream '{}' already exists", self.stream_name);
                return Ok(());
            }
            Err(_) => {
                info!("Stream '{}' does not exist, creating...", self.stream_name);
            }
        }

        // Devices only care about the latest set, so keep one message per subject
        let stream_config = stream::Config {
            name: self.stream_name.clone(),
            subjects: self.stream_subjects(),
            max_messages_per_subject: 1,
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        jetstream
            .create_stream(stream_config)
            .await
            .context("Failed to create JetStream stream")?;

        client.flush().await.context("Failed to flush NATS connection")?;

        info!("Created JetStream stream '{}'", self.stream_name);
        Ok(())
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    fn transport(&self) -> &'static str {
        "nats"
    }

    async fn connect(&self) -> Result<Box<dyn BusSession>> {
        debug!(url = %self.url, "Connecting to NATS");

        let client = async_nats::connect(&self.url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", self.url))?;
        let jetstream = jetstream::new(client.clone());

        Ok(Box::new(NatsSession { client, jetstream }))
    }
}

struct NatsSession {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

#[async_trait]
impl BusSession for NatsSession {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let subject = nats_subject(topic);

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish to subject '{}'", subject))?
            .await
            .context("Failed to await publish ack")?;

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;
        Ok(())
    }
}
