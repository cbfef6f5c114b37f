//! Intercepted traffic model
//!
//! A [`TrafficMessage`] is the small, queue-friendly handle for one finished
//! protocol unit. The full payload lives in a [`PayloadStore`] and is only
//! resolved by the scan worker.

pub mod har;
mod http;
mod store;
mod websocket;

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use http::{Cookie, HttpExchange, HttpRequest, HttpResponse};
pub use store::{MessageHistory, PayloadStore};
pub use websocket::{Opcode, WebSocketFrame};

/// Logical connection identity
pub type ChannelId = u64;

/// Direction of a message relative to the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    FromClient,
    FromServer,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::FromClient => "FROM_CLIENT",
            Direction::FromServer => "FROM_SERVER",
        }
    }
}

/// Protocol family of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Http,
    WebSocket,
}

/// Where the traffic originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Regular proxied traffic between a client and a remote server
    Proxied,
    /// Traffic produced by a server component hosted by the tool itself
    ServerMode,
}

/// One intercepted HTTP exchange or WebSocket frame
///
/// Holds identifiers only; the payload is looked up by `id` when the
/// message is scanned.
#[derive(Debug)]
pub struct TrafficMessage {
    /// Unique within the channel
    pub id: u64,
    pub channel_id: ChannelId,
    pub direction: Direction,
    pub kind: MessageKind,
    pub origin: Origin,
    /// Target URL, used for scope checks and task reporting
    pub target: String,
    pub timestamp: DateTime<Utc>,
    /// Cached eligibility decision
    scan_decision: OnceLock<bool>,
}

impl TrafficMessage {
    pub fn new(
        id: u64,
        channel_id: ChannelId,
        direction: Direction,
        kind: MessageKind,
        target: &str,
    ) -> Self {
        Self {
            id,
            channel_id,
            direction,
            kind,
            origin: Origin::Proxied,
            target: target.to_string(),
            timestamp: Utc::now(),
            scan_decision: OnceLock::new(),
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Compute the eligibility decision once and reuse it afterwards
    pub fn scan_decision(&self, decide: impl FnOnce(&TrafficMessage) -> bool) -> bool {
        *self.scan_decision.get_or_init(|| decide(self))
    }

    /// Short identifier used in logs and task views
    pub fn identifier(&self) -> String {
        match self.kind {
            MessageKind::Http => self.target.clone(),
            MessageKind::WebSocket => {
                format!("{} (channel {}, frame {})", self.target, self.channel_id, self.id)
            }
        }
    }
}

/// Full content of a message, resolved from the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Http(HttpExchange),
    WebSocket(WebSocketFrame),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Http(_) => MessageKind::Http,
            Payload::WebSocket(_) => MessageKind::WebSocket,
        }
    }

    pub fn as_http(&self) -> Option<&HttpExchange> {
        match self {
            Payload::Http(exchange) => Some(exchange),
            Payload::WebSocket(_) => None,
        }
    }

    pub fn as_frame(&self) -> Option<&WebSocketFrame> {
        match self {
            Payload::WebSocket(frame) => Some(frame),
            Payload::Http(_) => None,
        }
    }
}
