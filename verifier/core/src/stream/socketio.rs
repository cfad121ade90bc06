use std::io;

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use platform_http_client::ChannelToken;
use tokio::{
    net::TcpStream,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace, warn};
use url::Url;

use super::{
    engine_io::{self, Packet, SocketPacket},
    state_machine::{CloseCode, TransportErrorKind},
    transport::{Inbound, StreamConnection, StreamTransport, TransportError},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close status reported when the peer sends a close frame without a code.
const NO_STATUS: CloseCode = CloseCode(1005);

/// Websocket transport to the data broker's Socket.IO endpoint, delivering
/// the payloads of a single event name.
#[derive(Clone, Debug)]
pub struct SocketIoTransport {
    base: Url,
    event: String,
}

impl SocketIoTransport {
    #[must_use]
    pub fn new(base: Url, event: impl Into<String>) -> Self {
        Self {
            base,
            event: event.into(),
        }
    }

    pub fn endpoint(&self, token: &ChannelToken) -> Result<Url, TransportError> {
        let mut url = self
            .base
            .join("/socket.io/")
            .map_err(|error| TransportError::new(TransportErrorKind::Other, error))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("cannot use {scheme} with {}", self.base),
            )
        })?;
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", "3")
            .append_pair("transport", "websocket")
            .append_pair("token", token.as_str());
        Ok(url)
    }
}

#[async_trait]
impl StreamTransport for SocketIoTransport {
    async fn open(
        &self,
        token: &ChannelToken,
    ) -> Result<Box<dyn StreamConnection>, TransportError> {
        let url = self.endpoint(token)?;
        debug!(base = %self.base, "opening push channel");
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::new(error_kind(&error), error))?;

        let handshake = loop {
            let frame = ws.next().await.ok_or_else(|| {
                TransportError::new(TransportErrorKind::Other, "closed before handshake")
            })?;
            let frame = frame.map_err(|error| TransportError::new(error_kind(&error), error))?;
            if let Message::Text(text) = frame {
                match engine_io::decode(&text) {
                    Ok(Packet::Open(handshake)) => break handshake,
                    Ok(other) => trace!(?other, "skipping frame before handshake"),
                    Err(error) => return Err(TransportError::new(TransportErrorKind::Other, error)),
                }
            }
        };
        debug!(
            sid = %handshake.sid,
            ping_interval = ?handshake.ping_interval(),
            "push channel open"
        );

        let period = handshake.ping_interval();
        if period.is_zero() {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                "handshake announced a zero ping interval",
            ));
        }
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Box::new(SocketIoConnection {
            ws,
            ping,
            event: self.event.clone(),
        }))
    }
}

struct SocketIoConnection {
    ws: WsStream,
    ping: Interval,
    event: String,
}

impl SocketIoConnection {
    async fn send(&mut self, frame: String) -> Result<(), Inbound> {
        self.ws.send(Message::Text(frame)).await.map_err(|error| {
            warn!(%error, "push channel write failed");
            Inbound::Failed(error_kind(&error))
        })
    }

    /// Handles one text frame, returning an event for the driver if it
    /// carries one.
    async fn on_text(&mut self, text: &str) -> Option<Inbound> {
        let packet = match engine_io::decode(text) {
            Ok(packet) => packet,
            Err(error) => {
                warn!(%error, "dropping undecodable frame");
                return None;
            }
        };
        match packet {
            Packet::Ping(data) => self.send(engine_io::encode_pong(&data)).await.err(),
            Packet::Message(SocketPacket::Event { name, payload }) if name == self.event => {
                Some(Inbound::Message(payload))
            }
            Packet::Message(SocketPacket::Error(error)) => {
                warn!(%error, "push channel reported an error");
                None
            }
            // An engine close without a websocket close frame is treated as a drop.
            Packet::Close => Some(Inbound::Closed(CloseCode::ABNORMAL)),
            Packet::Message(SocketPacket::Disconnect) => Some(Inbound::Closed(CloseCode::NORMAL)),
            other => {
                trace!(?other, "ignoring packet");
                None
            }
        }
    }
}

#[async_trait]
impl StreamConnection for SocketIoConnection {
    async fn next_event(&mut self) -> Inbound {
        loop {
            tokio::select! {
                _ = self.ping.tick() => {
                    if let Err(failed) = self.send(engine_io::encode_ping()).await {
                        return failed;
                    }
                }
                frame = self.ws.next() => match frame {
                    None => return Inbound::Closed(CloseCode::ABNORMAL),
                    Some(Err(error)) => {
                        warn!(%error, "push channel error");
                        return Inbound::Failed(error_kind(&error));
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = self.on_text(&text).await {
                            return event;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code =
                            frame.map_or(NO_STATUS, |frame| CloseCode(u16::from(frame.code)));
                        debug!(%code, "push channel closed by peer");
                        return Inbound::Closed(code);
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    async fn close(&mut self) {
        if let Err(error) = self.ws.send(Message::Text(engine_io::encode_close())).await {
            debug!(%error, "could not announce close");
        }
        if let Err(error) = self.ws.close(None).await {
            debug!(%error, "websocket close failed");
        }
    }
}

fn error_kind(error: &tungstenite::Error) -> TransportErrorKind {
    match error {
        tungstenite::Error::Io(source) if source.kind() == io::ErrorKind::ConnectionRefused => {
            TransportErrorKind::ConnectionRefused
        }
        _ => TransportErrorKind::Other,
    }
}
