//! Socket.IO v4 text framing over a raw WebSocket.
//!
//! Only what the agenda channel needs: the Engine.IO handshake and heartbeat,
//! default-namespace connect/disconnect, and JSON events. Binary attachments
//! and acknowledgements decode as [`SocketPacket::Unsupported`].

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AgendaError, Result};

/// Engine.IO open handshake (`0{...}`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
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
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, payload: Value },
    ConnectError(Value),
    Unsupported(String),
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| AgendaError::transport("empty engine.io frame"))?;
        let body = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(body)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => Ok(EnginePacket::Message(SocketPacket::decode(body)?)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(AgendaError::transport(format!("unknown engine.io packet type '{}'", other))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

impl SocketPacket {
    pub fn decode(body: &str) -> Result<Self> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .ok_or_else(|| AgendaError::transport("empty socket.io packet"))?;
        let rest = skip_namespace(chars.as_str());

        match kind {
            '0' => {
                let data = if rest.is_empty() { None } else { Some(serde_json::from_str(rest)?) };
                Ok(SocketPacket::Connect(data))
            }
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let json = rest.trim_start_matches(|c: char| c.is_ascii_digit());
                let mut args: Vec<Value> = serde_json::from_str(json)?;
                if args.is_empty() {
                    return Err(AgendaError::transport("socket.io event without a name"));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(AgendaError::transport(format!("socket.io event name is not a string: {}", other)))
                    }
                };
                let payload = if args.is_empty() { Value::Null } else { args.remove(0) };
                Ok(SocketPacket::Event { name, payload })
            }
            '4' => Ok(SocketPacket::ConnectError(
                serde_json::from_str(rest).unwrap_or(Value::String(rest.to_string())),
            )),
            _ => Ok(SocketPacket::Unsupported(body.to_string())),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(data)) => format!("0{}", data),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, payload } => {
                let args = if payload.is_null() {
                    Value::Array(vec![Value::String(name.clone())])
                } else {
                    Value::Array(vec![Value::String(name.clone()), payload.clone()])
                };
                format!("2{}", args)
            }
            SocketPacket::ConnectError(data) => format!("4{}", data),
            SocketPacket::Unsupported(raw) => raw.clone(),
        }
    }
}

/// `42["name",payload]`
pub fn event_frame(name: &str, payload: Value) -> String {
    EnginePacket::Message(SocketPacket::Event {
        name: name.to_string(),
        payload,
    })
    .encode()
}

/// `40`: connect to the default namespace.
pub fn connect_frame() -> String {
    EnginePacket::Message(SocketPacket::Connect(None)).encode()
}

/// WebSocket endpoint of the Socket.IO server behind an HTTP API base URL.
pub fn endpoint_url(api_url: &str) -> Result<String> {
    let mut url = Url::parse(api_url)
        .map_err(|e| AgendaError::Config(format!("invalid API url '{}': {}", api_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(AgendaError::Config(format!("unsupported url scheme '{}'", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| AgendaError::Config(format!("cannot derive websocket url from '{}'", api_url)))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url.to_string())
}

fn skip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        rest
    }
}
