//! Text framing of the data broker's push channel: Engine.IO v3 packets
//! carrying Socket.IO v2 packets.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

impl Handshake {
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect,
    Disconnect,
    Event { name: String, payload: Value },
    Error(Value),
    /// Acks and binary packets; the verifier never requests them.
    Unsupported(char),
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,
    #[error("unknown {layer} packet type `{kind}`")]
    UnknownType { layer: &'static str, kind: char },
    #[error("malformed open handshake: {0}")]
    Handshake(#[source] serde_json::Error),
    #[error("malformed event packet: {0}")]
    Event(#[source] serde_json::Error),
    #[error("event packet has no name")]
    EventName,
}

pub fn decode(frame: &str) -> Result<Packet, CodecError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let data = chars.as_str();
    match kind {
        '0' => serde_json::from_str(data)
            .map(Packet::Open)
            .map_err(CodecError::Handshake),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping(data.to_owned())),
        '3' => Ok(Packet::Pong(data.to_owned())),
        '4' => decode_socket(data).map(Packet::Message),
        '5' => Ok(Packet::Upgrade),
        '6' => Ok(Packet::Noop),
        other => Err(CodecError::UnknownType {
            layer: "engine.io",
            kind: other,
        }),
    }
}

fn decode_socket(data: &str) -> Result<SocketPacket, CodecError> {
    let mut chars = data.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let body = strip_namespace(chars.as_str());
    match kind {
        '0' => Ok(SocketPacket::Connect),
        '1' => Ok(SocketPacket::Disconnect),
        '2' => decode_event(body),
        '4' => Ok(SocketPacket::Error(
            serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_owned())),
        )),
        '3' | '5' | '6' => Ok(SocketPacket::Unsupported(kind)),
        other => Err(CodecError::UnknownType {
            layer: "socket.io",
            kind: other,
        }),
    }
}

// `/nsp,` prefixes packets outside the default namespace.
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        body.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        body
    }
}

fn decode_event(body: &str) -> Result<SocketPacket, CodecError> {
    // Optional ack id precedes the argument array.
    let arguments = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let values: Vec<Value> = serde_json::from_str(arguments).map_err(CodecError::Event)?;
    let mut values = values.into_iter();
    let Some(Value::String(name)) = values.next() else {
        return Err(CodecError::EventName);
    };
    Ok(SocketPacket::Event {
        name,
        payload: values.next().unwrap_or(Value::Null),
    })
}

#[must_use]
pub fn encode_ping() -> String {
    "2".to_owned()
}

#[must_use]
pub fn encode_pong(data: &str) -> String {
    format!("3{data}")
}

#[must_use]
pub fn encode_close() -> String {
    "1".to_owned()
}
