use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info};
use url::Url;

use crate::services::{DynError, Publisher};

const DEFAULT_MQTT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid broker address `{0}`")]
    InvalidBroker(Url),
    #[error("could not reach broker: {0}")]
    Connect(#[source] ConnectionError),
    #[error("broker did not acknowledge the connection within {0:?}")]
    ConnectTimeout(Duration),
    #[error("failed to hand message to the client: {0}")]
    Client(#[source] ClientError),
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Publishes each message over a short-lived MQTT connection at QoS 0.
#[derive(Clone, Debug)]
pub struct MqttPublisher {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl MqttPublisher {
    pub fn from_url(broker: &Url, connect_timeout: Duration) -> Result<Self, PublishError> {
        let host = broker
            .host_str()
            .ok_or_else(|| PublishError::InvalidBroker(broker.clone()))?;
        Ok(Self {
            host: host.to_owned(),
            port: broker.port().unwrap_or(DEFAULT_MQTT_PORT),
            connect_timeout,
        })
    }

    #[must_use]
    pub fn address(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    async fn connect(&self) -> Result<(AsyncClient, EventLoop), PublishError> {
        let client_id = format!("baseline-verifier-{:04x}", rand::random::<u16>());
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, mut event_loop) = AsyncClient::new(options, 10);

        debug!(host = %self.host, port = self.port, "connecting to MQTT broker");
        timeout(self.connect_timeout, async {
            loop {
                match event_loop.poll().await.map_err(PublishError::Connect)? {
                    Event::Incoming(Packet::ConnAck(_)) => return Ok::<_, PublishError>(()),
                    other => debug!(?other, "waiting for CONNACK"),
                }
            }
        })
        .await
        .map_err(|_| PublishError::ConnectTimeout(self.connect_timeout))??;

        Ok((client, event_loop))
    }

    pub async fn send(&self, topic: &str, payload: &Value) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload).map_err(PublishError::Encode)?;
        let (client, mut event_loop) = self.connect().await?;

        info!(topic, "publishing message");
        client
            .publish(topic, QoS::AtMostOnce, false, body)
            .await
            .map_err(PublishError::Client)?;
        client.disconnect().await.map_err(PublishError::Client)?;

        // Drive the event loop until the publish and the disconnect are written.
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(event) => debug!(?event, "flushing MQTT session"),
                Err(error) => {
                    debug!(%error, "MQTT session ended while flushing");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), DynError> {
        Ok(self.send(topic, payload).await?)
    }
}
