use async_trait::async_trait;
use platform_http_client::ChannelToken;
use serde_json::Value;

use super::state_machine::{CloseCode, TransportErrorKind};
use crate::services::DynError;

/// What an open connection reports to the stream driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Payload of an event the client subscribes to.
    Message(Value),
    Closed(CloseCode),
    Failed(TransportErrorKind),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to open push channel ({kind:?}): {source}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    #[source]
    pub source: DynError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<DynError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }
}

#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    async fn open(&self, token: &ChannelToken) -> Result<Box<dyn StreamConnection>, TransportError>;
}

#[async_trait]
pub trait StreamConnection: Send {
    /// Waits for the next inbound event. A connection that ends without a
    /// close frame reports [`CloseCode::ABNORMAL`].
    async fn next_event(&mut self) -> Inbound;

    async fn close(&mut self);
}
