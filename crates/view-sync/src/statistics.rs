//! Traffic counters for a communication channel

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    /// Encoded bytes sent
    pub bytes_sent: u64,
    /// Messages sent
    pub messages_sent: u64,
    /// Encoded bytes received
    pub bytes_received: u64,
    /// Messages received
    pub messages_received: u64,
}

/// Counters updated from both sending tasks and the dispatch side.
#[derive(Debug, Default)]
pub struct Statistics {
    bytes_sent: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_received: AtomicU64,
}

impl Statistics {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sent message of `bytes` bytes
    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one received message of `bytes` bytes
    pub fn record_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Total encoded bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total messages sent
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Total encoded bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Total messages received
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Copy all counters
    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            bytes_sent: self.bytes_sent(),
            messages_sent: self.messages_sent(),
            bytes_received: self.bytes_received(),
            messages_received: self.messages_received(),
        }
    }

    /// Zero all counters
    pub fn reset(&self) {
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.messages_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[test]
    fn test_record_and_snapshot() {
        let stats = Statistics::new();
        stats.record_sent(10);
        stats.record_sent(5);
        stats.record_received(7);

        assert_eq!(
            stats.snapshot(),
            StatisticsSnapshot {
                bytes_sent: 15,
                messages_sent: 2,
                bytes_received: 7,
                messages_received: 1,
            }
        );

        stats.reset();
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(Statistics::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_sent(2);
                        stats.record_received(1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.messages_sent(), 4000);
        assert_eq!(stats.bytes_sent(), 8000);
        assert_eq!(stats.messages_received(), 4000);
        assert_eq!(stats.bytes_received(), 4000);
    }
}
