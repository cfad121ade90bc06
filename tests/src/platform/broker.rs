use std::{io, time::Duration};

use async_trait::async_trait;
use platform_http_client::{ChannelToken, HistoryRecord};
use serde_json::{json, Value};
use tokio::{sync::mpsc, time::sleep};
use tracing::debug;
use verifier_core::{
    stream::{
        CloseCode, Inbound, StreamConnection, StreamTransport, TransportError, TransportErrorKind,
    },
    DynError, Publisher,
};

use super::{FakeError, FakePlatform};

pub(super) struct Subscriber {
    tenant: String,
    events: mpsc::UnboundedSender<Inbound>,
}

/// Splits `/<tenant>/<device>/attrs`.
fn route(topic: &str) -> Option<(&str, &str)> {
    let mut segments = topic.strip_prefix('/')?.split('/');
    match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(tenant), Some(device), Some("attrs"), None)
            if !tenant.is_empty() && !device.is_empty() =>
        {
            Some((tenant, device))
        }
        _ => None,
    }
}

impl FakePlatform {
    fn push(&self, tenant: &str, message: &Value) {
        let mut state = self.lock();
        state.subscribers.retain(|subscriber| {
            if subscriber.tenant != tenant {
                return !subscriber.events.is_closed();
            }
            subscriber
                .events
                .send(Inbound::Message(message.clone()))
                .is_ok()
        });
    }
}

impl FakePlatform {
    /// Stores the publish and returns the push it triggers, if any.
    fn accept(&self, topic: &str, payload: &Value) -> Result<Option<Delivery>, FakeError> {
        let (tenant, device_id) = route(topic).ok_or_else(|| FakeError::Topic(topic.to_owned()))?;
        let mut state = self.lock();
        state.published.push((topic.to_owned(), payload.clone()));
        let sequence = state.published.len();

        if let Some(attrs) = payload.as_object() {
            let history_rewrite = state.behaviour.history_rewrite;
            let records = state.history.entry(device_id.to_owned()).or_default();
            for (attr, value) in attrs {
                let mut record = HistoryRecord {
                    attr: attr.clone(),
                    value: value.clone(),
                    device_id: device_id.to_owned(),
                    ts: Some(format!("2019-02-18T12:00:{:02}.000Z", sequence % 60)),
                };
                if let Some(rewrite) = history_rewrite {
                    rewrite(&mut record);
                }
                records.push(record);
            }
        }

        if state.behaviour.push_disabled {
            debug!(topic, "push delivery disabled");
            return Ok(None);
        }
        let mut message = json!({
            "attrs": payload,
            "metadata": { "deviceid": device_id, "tenant": tenant },
            "timestamp": 1_550_491_200_000_u64 + u64::try_from(sequence).unwrap_or_default(),
        });
        if let Some(rewrite) = state.behaviour.push_rewrite {
            rewrite(&mut message);
        }
        Ok(Some(Delivery {
            tenant: tenant.to_owned(),
            message,
            latency: state.behaviour.push_latency,
        }))
    }
}

struct Delivery {
    tenant: String,
    message: Value,
    latency: Duration,
}

#[async_trait]
impl Publisher for FakePlatform {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), DynError> {
        if let Some(Delivery {
            tenant,
            message,
            latency,
        }) = self.accept(topic, payload)?
        {
            let platform = self.clone();
            tokio::spawn(async move {
                sleep(latency).await;
                platform.push(&tenant, &message);
            });
        }

        let ack_delay = self.lock().behaviour.publish_ack_delay;
        if !ack_delay.is_zero() {
            sleep(ack_delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl StreamTransport for FakePlatform {
    async fn open(
        &self,
        token: &ChannelToken,
    ) -> Result<Box<dyn StreamConnection>, TransportError> {
        let mut state = self.lock();
        let tenant = state
            .channel_tokens
            .get(token.as_str())
            .cloned()
            .ok_or_else(|| {
                TransportError::new(TransportErrorKind::Other, FakeError::UnknownToken)
            })?;
        if state.behaviour.refused_connections > 0 {
            state.behaviour.refused_connections -= 1;
            return Err(TransportError::new(
                TransportErrorKind::ConnectionRefused,
                io::Error::from(io::ErrorKind::ConnectionRefused),
            ));
        }

        state.opened_connections += 1;
        let (events, inbound) = mpsc::unbounded_channel();
        if state.behaviour.dropped_connections > 0 {
            state.behaviour.dropped_connections -= 1;
            let _ = events.send(Inbound::Closed(CloseCode::ABNORMAL));
        } else {
            state.subscribers.push(Subscriber { tenant, events });
        }
        Ok(Box::new(FakeConnection { inbound }))
    }
}

struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl StreamConnection for FakeConnection {
    async fn next_event(&mut self) -> Inbound {
        self.inbound
            .recv()
            .await
            .unwrap_or(Inbound::Closed(CloseCode::ABNORMAL))
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

#[cfg(test)]
mod tests {
    use super::route;

    #[test]
    fn only_attribute_topics_are_routed() {
        assert_eq!(route("/admin/d001/attrs"), Some(("admin", "d001")));
        assert_eq!(route("admin/d001/attrs"), None);
        assert_eq!(route("/admin/d001/config"), None);
        assert_eq!(route("//d001/attrs"), None);
        assert_eq!(route("/admin/d001/attrs/extra"), None);
    }
}
