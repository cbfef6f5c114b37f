//! Hand-off queue between the interception path and scan workers

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::traffic::TrafficMessage;

/// Multi-producer, multi-consumer FIFO of messages awaiting a scan
///
/// Unbounded unless `max_depth > 0`, in which case a full queue drops the
/// newest message and `enqueue` returns `false`. Producers never block
/// for longer than the internal lock hold.
pub struct ScanQueue {
    messages: Mutex<VecDeque<TrafficMessage>>,
    available: Condvar,
    max_depth: usize,
    dropped: AtomicU64,
}

impl ScanQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            max_depth,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn enqueue(&self, message: TrafficMessage) -> bool {
        {
            let mut messages = self.messages.lock();
            if self.max_depth > 0 && messages.len() >= self.max_depth {
                drop(messages);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(message_id = message.id, channel_id = message.channel_id, "Scan queue full, dropping message");
                return false;
            }
            messages.push_back(message);
        }
        self.available.notify_one();
        true
    }

    /// Pop the oldest message without waiting
    pub fn poll(&self) -> Option<TrafficMessage> {
        self.messages.lock().pop_front()
    }

    /// Pop the oldest message, waiting up to `timeout` for one to arrive
    pub fn poll_timeout(&self, timeout: Duration) -> Option<TrafficMessage> {
        let mut messages = self.messages.lock();
        if messages.is_empty() {
            // A spurious or shutdown wake-up simply returns None
            self.available.wait_for(&mut messages, timeout);
        }
        messages.pop_front()
    }

    /// Drop every pending message; returns how many were discarded
    ///
    /// Messages enqueued after the lock is released are kept.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.messages.lock());
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Messages rejected because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wake every waiting consumer (used on shutdown)
    pub fn wake_all(&self) {
        self.available.notify_all();
    }
}

impl Default for ScanQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::{Direction, MessageKind};
    use std::sync::Arc;
    use std::time::Instant;

    fn message(channel: u64, id: u64) -> TrafficMessage {
        TrafficMessage::new(id, channel, Direction::FromClient, MessageKind::WebSocket, "ws://a.test/")
    }

    #[test]
    fn test_fifo_order() {
        let queue = ScanQueue::unbounded();
        for id in 1..=3 {
            assert!(queue.enqueue(message(1, id)));
        }
        let ids: Vec<u64> = std::iter::from_fn(|| queue.poll()).map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_clear_keeps_later_messages() {
        let queue = ScanQueue::unbounded();
        queue.enqueue(message(1, 1));
        queue.enqueue(message(1, 2));
        assert_eq!(queue.clear(), 2);

        queue.enqueue(message(1, 3));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.poll().map(|m| m.id), Some(3));
    }

    #[test]
    fn test_bounded_drops_newest() {
        let queue = ScanQueue::new(1);
        assert!(queue.enqueue(message(1, 1)));
        assert!(!queue.enqueue(message(1, 2)));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.poll().map(|m| m.id), Some(1));
    }

    #[test]
    fn test_poll_timeout_wakes_on_enqueue() {
        let queue = Arc::new(ScanQueue::unbounded());
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                queue.enqueue(message(1, 1));
            })
        };

        let start = Instant::now();
        let got = queue.poll_timeout(Duration::from_secs(5));
        producer.join().unwrap();

        assert_eq!(got.map(|m| m.id), Some(1));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(ScanQueue::unbounded());
        let handles: Vec<_> = (0..4)
            .map(|channel| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for id in 0..250 {
                        queue.enqueue(message(channel, id));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 1000);

        // Per-channel order is preserved
        let mut last = std::collections::HashMap::new();
        while let Some(msg) = queue.poll() {
            if let Some(prev) = last.insert(msg.channel_id, msg.id) {
                assert!(msg.id > prev);
            }
        }
    }
}
