use super::{BusConnector, BusSession};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_PORT: u16 = 1883;

/// Request channel capacity; a session only ever queues one publish and a disconnect.
const REQUEST_CAPACITY: usize = 10;

/// MQTT 3.1.1 broker connector.
///
/// Every session uses a fresh clean-session client id so concurrent
/// dispatches never take over each other's connection.
pub struct MqttConnector {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
}

impl MqttConnector {
    /// Builds a connector from `mqtt://[user[:password]@]host[:port]`.
    pub fn from_url(url: &Url, keep_alive: Duration) -> Result<Self> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .context("MQTT URL has no host")?
            .to_string();

        let credentials = if url.username().is_empty() {
            None
        } else {
            let username = urlencoding::decode(url.username())
                .context("MQTT username is not valid UTF-8")?
                .into_owned();
            let password = match url.password() {
                Some(p) => urlencoding::decode(p)
                    .context("MQTT password is not valid UTF-8")?
                    .into_owned(),
                None => String::new(),
            };
            Some((username, password))
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            credentials,
            keep_alive,
        })
    }

    /// `host:port` of the broker
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn options(&self) -> MqttOptions {
        // 3.1.1 brokers only have to accept ids up to 23 bytes
        let client_id = format!("sched-{}", &Uuid::new_v4().simple().to_string()[..16]);

        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username.clone(), password.clone());
        }
        options
    }
}

#[async_trait]
impl BusConnector for MqttConnector {
    fn transport(&self) -> &'static str {
        "mqtt"
    }

    async fn connect(&self) -> Result<Box<dyn BusSession>> {
        let options = self.options();
        debug!(broker = %self.address(), client_id = %options.client_id(), "Connecting to MQTT broker");

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        bail!("MQTT broker {} refused connection: {:?}", self.address(), ack.code);
                    }
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    return Err(anyhow!(e))
                        .with_context(|| format!("Failed to connect to MQTT broker {}", self.address()));
                }
            }
        }

        Ok(Box::new(MqttSession {
            client,
            eventloop,
            connection_lost: false,
        }))
    }
}

/// Connected MQTT client together with the event loop driving it.
///
/// The event loop is polled inline; no background task outlives the session.
struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Set once the event loop has failed. Polling again would make rumqttc
    /// reconnect, so `close` has nothing left to do.
    connection_lost: bool,
}

#[async_trait]
impl BusSession for MqttSession {
    /// QoS 2: completes on the broker's `PUBCOMP` for this packet.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::ExactlyOnce, false, payload)
            .await
            .with_context(|| format!("Failed to publish to '{}'", topic))?;

        let mut pkid = None;
        loop {
            let event = match self.eventloop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    self.connection_lost = true;
                    return Err(anyhow!(e))
                        .context("MQTT connection lost before publish was confirmed");
                }
            };

            match event {
                Event::Outgoing(Outgoing::Publish(id)) => pkid = Some(id),
                Event::Incoming(Packet::PubComp(comp)) if Some(comp.pkid) == pkid => {
                    debug!(topic = %topic, pkid = comp.pkid, "Publish confirmed by broker");
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.connection_lost {
            debug!("MQTT connection already lost, skipping disconnect");
            return Ok(());
        }

        self.client
            .disconnect()
            .await
            .context("Failed to request MQTT disconnect")?;

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => continue,
                Err(e) => {
                    self.connection_lost = true;
                    return Err(anyhow!(e)).context("MQTT disconnect failed");
                }
            }
        }
    }
}
