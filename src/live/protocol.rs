//! Engine.IO v4 / Socket.IO v5 text framing, websocket transport only.
//!
//! An Engine.IO packet is one digit followed by its payload. Type `4`
//! (message) carries a Socket.IO packet:
//! `<type>[/<namespace>,][<ack id>][<json>]`.
//! Binary attachments are not used by the chart namespace and are not decoded.

use crate::error::ChartError;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

pub const DEFAULT_NAMESPACE: &str = "/";

/// Handshake sent by the server right after the websocket opens.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}
fn default_ping_timeout() -> u64 {
    20_000
}

impl OpenInfo {
    /// How long to wait for the next server ping before declaring the link dead.
    pub fn heartbeat_ms(&self) -> u64 {
        self.ping_interval + self.ping_timeout
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Socket(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect { nsp: String, data: Option<Value> },
    Disconnect { nsp: String },
    Event { nsp: String, id: Option<u64>, name: String, args: Vec<Value> },
    Ack { nsp: String, id: Option<u64>, args: Vec<Value> },
    ConnectError { nsp: String, data: Option<Value> },
}

impl SocketPacket {
    pub fn nsp(&self) -> &str {
        match self {
            Self::Connect { nsp, .. }
            | Self::Disconnect { nsp }
            | Self::Event { nsp, .. }
            | Self::Ack { nsp, .. }
            | Self::ConnectError { nsp, .. } => nsp,
        }
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

pub fn decode(text: &str) -> Result<EnginePacket, ChartError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ChartError::Protocol("empty engine.io frame".into()))?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => Ok(EnginePacket::Socket(decode_socket(rest)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(ChartError::Protocol(format!("unknown engine.io packet type '{}'", other))),
    }
}

fn decode_socket(text: &str) -> Result<SocketPacket, ChartError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ChartError::Protocol("empty socket.io packet".into()))?;
    let mut rest = chars.as_str();

    let nsp = if rest.starts_with('/') {
        let end = rest.find(',').unwrap_or(rest.len());
        let nsp = &rest[..end];
        rest = rest.get(end + 1..).unwrap_or("");
        nsp.to_string()
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let id = if digits > 0 {
        let id = rest[..digits]
            .parse::<u64>()
            .map_err(|e| ChartError::Protocol(format!("bad ack id: {}", e)))?;
        rest = &rest[digits..];
        Some(id)
    } else {
        None
    };

    let data: Option<Value> = if rest.trim().is_empty() {
        None
    } else {
        Some(serde_json::from_str(rest)?)
    };

    match kind {
        '0' => Ok(SocketPacket::Connect { nsp, data }),
        '1' => Ok(SocketPacket::Disconnect { nsp }),
        '2' => {
            let mut items = match data {
                Some(Value::Array(items)) if !items.is_empty() => items,
                other => {
                    return Err(ChartError::Protocol(format!("event without name: {:?}", other)));
                }
            };
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(ChartError::Protocol(format!("event name is not a string: {}", other)));
                }
            };
            Ok(SocketPacket::Event { nsp, id, name, args: items })
        }
        '3' => {
            let args = match data {
                Some(Value::Array(items)) => items,
                Some(v) => vec![v],
                None => Vec::new(),
            };
            Ok(SocketPacket::Ack { nsp, id, args })
        }
        '4' => Ok(SocketPacket::ConnectError { nsp, data }),
        '5' | '6' => Err(ChartError::Protocol("binary socket.io packets are not supported".into())),
        other => Err(ChartError::Protocol(format!("unknown socket.io packet type '{}'", other))),
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

pub fn encode(packet: &EnginePacket) -> String {
    match packet {
        EnginePacket::Open(_) => "0".to_string(),
        EnginePacket::Close => "1".to_string(),
        EnginePacket::Ping(p) => format!("2{}", p),
        EnginePacket::Pong(p) => format!("3{}", p),
        EnginePacket::Socket(s) => format!("4{}", encode_socket(s)),
        EnginePacket::Upgrade => "5".to_string(),
        EnginePacket::Noop => "6".to_string(),
    }
}

fn nsp_prefix(nsp: &str) -> String {
    if nsp == DEFAULT_NAMESPACE || nsp.is_empty() {
        String::new()
    } else {
        format!("{},", nsp)
    }
}

fn encode_socket(packet: &SocketPacket) -> String {
    let prefix = nsp_prefix(packet.nsp());
    match packet {
        SocketPacket::Connect { data, .. } => match data {
            Some(d) => format!("0{}{}", prefix, d),
            None => format!("0{}", prefix),
        },
        SocketPacket::Disconnect { .. } => format!("1{}", prefix),
        SocketPacket::Event { id, name, args, .. } => {
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            let id = id.map(|i| i.to_string()).unwrap_or_default();
            format!("2{}{}{}", prefix, id, Value::Array(items))
        }
        SocketPacket::Ack { id, args, .. } => {
            let id = id.map(|i| i.to_string()).unwrap_or_default();
            format!("3{}{}{}", prefix, id, Value::Array(args.clone()))
        }
        SocketPacket::ConnectError { data, .. } => match data {
            Some(d) => format!("4{}{}", prefix, d),
            None => format!("4{}", prefix),
        },
    }
}

pub fn connect(nsp: &str) -> String {
    encode(&EnginePacket::Socket(SocketPacket::Connect {
        nsp: nsp.to_string(),
        data: None,
    }))
}

pub fn disconnect(nsp: &str) -> String {
    encode(&EnginePacket::Socket(SocketPacket::Disconnect {
        nsp: nsp.to_string(),
    }))
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Derive the websocket endpoint from the REST base URL.
///
/// The namespace is not part of the URL; it is joined after the handshake.
pub fn socket_url(base_url: &str) -> Result<Url, ChartError> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChartError::Protocol(format!("cannot open a socket over '{}'", other)));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ChartError::Protocol(format!("cannot switch {} to {}", base_url, scheme)))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    url.set_fragment(None);
    Ok(url)
}
