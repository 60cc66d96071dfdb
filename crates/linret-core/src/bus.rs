//! Bounded inter-thread queues between the five coordination components.
//!
//! Every queue is a `crossbeam_channel::bounded` pair; producers use
//! `try_send` and count drops rather than blocking, since a slow consumer
//! must never stall the sender's thread. Mirrors the RT-to-NRT bridge
//! pattern, generalized to a plain counter instead of a broadcast rebroadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// A bounded queue that counts messages dropped because the receiver fell
/// behind, instead of blocking the sender.
pub struct Bus<T> {
    tx: Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Bus {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> Bus<T> {
    pub fn new(capacity: usize) -> (Bus<T>, Receiver<T>) {
        let (tx, rx) = bounded(capacity);
        (
            Bus {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Attempts to enqueue `msg`. On a full queue the message is dropped and
    /// the drop counter incremented; the caller never blocks.
    pub fn push(&self, msg: T) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn full_queue_drops_and_counts_instead_of_blocking() {
        let (bus, rx) = Bus::new(2);
        bus.push(1);
        bus.push(2);
        bus.push(3); // queue full, dropped
        assert_eq!(bus.dropped_count(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).unwrap(), 2);
    }

    #[test]
    fn disconnected_receiver_counts_as_dropped() {
        let (bus, rx) = Bus::new(1);
        drop(rx);
        bus.push(42);
        assert_eq!(bus.dropped_count(), 1);
    }
}
