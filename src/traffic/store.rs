//! Payload storage for intercepted messages

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use super::{ChannelId, Direction, HttpExchange, Origin, Payload, TrafficMessage, WebSocketFrame};
use crate::error::StoreError;

/// Backing store the scan worker resolves payloads from
///
/// Implementations must be callable from the worker thread.
pub trait PayloadStore: Send + Sync {
    fn load(&self, message: &TrafficMessage) -> Result<Payload, StoreError>;
}

type EntryKey = (ChannelId, u64);

#[derive(Default)]
struct HistoryInner {
    payloads: HashMap<EntryKey, Payload>,
    /// Insertion order, oldest first
    order: VecDeque<EntryKey>,
    /// Next id per open channel
    next_ids: HashMap<ChannelId, u64>,
}

/// In-memory message history
///
/// Keeps the most recent `max_entries` payloads and hands out message ids
/// that are unique within their channel. Counters are per instance and
/// live until [`close_channel`](Self::close_channel).
pub struct MessageHistory {
    inner: RwLock<HistoryInner>,
    max_entries: usize,
}

impl MessageHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(HistoryInner::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Assign the next id on `channel_id` and store its payload
    fn record(&self, channel_id: ChannelId, payload: Payload) -> u64 {
        let mut inner = self.inner.write();
        let next = inner.next_ids.entry(channel_id).or_insert(1);
        let id = *next;
        *next += 1;

        inner.payloads.insert((channel_id, id), payload);
        inner.order.push_back((channel_id, id));

        // Trim if over limit
        while inner.order.len() > self.max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                inner.payloads.remove(&oldest);
            }
        }
        id
    }

    /// Store a finished HTTP exchange and return its queue handle
    pub fn record_http(&self, channel_id: ChannelId, exchange: HttpExchange) -> TrafficMessage {
        let direction = if exchange.response.is_some() {
            Direction::FromServer
        } else {
            Direction::FromClient
        };
        let url = exchange.request.url.clone();
        let id = self.record(channel_id, Payload::Http(exchange));
        TrafficMessage::new(id, channel_id, direction, super::MessageKind::Http, &url)
    }

    /// Store a WebSocket frame and return its queue handle
    pub fn record_frame(
        &self,
        channel_id: ChannelId,
        url: &str,
        direction: Direction,
        origin: Origin,
        frame: WebSocketFrame,
    ) -> TrafficMessage {
        let id = self.record(channel_id, Payload::WebSocket(frame));
        TrafficMessage::new(id, channel_id, direction, super::MessageKind::WebSocket, url)
            .with_origin(origin)
    }

    /// Forget the id counter of a finished channel
    ///
    /// Stored payloads stay until evicted. The channel id must not be
    /// recorded on again, its ids would restart at 1.
    pub fn close_channel(&self, channel_id: ChannelId) -> bool {
        self.inner.write().next_ids.remove(&channel_id).is_some()
    }

    /// Channels with a live id counter
    pub fn open_channels(&self) -> usize {
        self.inner.read().next_ids.len()
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Check if history is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    /// Clear all stored payloads; id counters are kept
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.payloads.clear();
        inner.order.clear();
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(10000)
    }
}

impl PayloadStore for MessageHistory {
    fn load(&self, message: &TrafficMessage) -> Result<Payload, StoreError> {
        self.inner
            .read()
            .payloads
            .get(&(message.channel_id, message.id))
            .cloned()
            .ok_or(StoreError::NotFound(message.id))
    }
}
