//! Bounded notification pool between watcher and worker threads
//!
//! A watcher thread inserts raw messages; a single worker thread drains
//! them. The two synchronize only through this pool. Insertion blocks when
//! the pool is at capacity (backpressure on the watcher) and fails with the
//! distinguished [`Error::PoolShutdown`] when the pool is (or becomes)
//! closed mid-insert, so a watcher's retry loop can unwind cleanly instead
//! of retrying forever.
//!
//! Each notification is keyed by a caller-supplied identifier; a key
//! already in flight is rejected, giving at-most-one-in-flight-per-key
//! auditing across watcher redeliveries.

use crate::protocol::Notification;
use crate::{Error, Result};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Bounded, shutdown-aware producer/consumer queue
///
/// Clones share the same pool. Intended use is many inserters, one drainer.
#[derive(Clone)]
pub struct NotificationPool {
    tx: Sender<Notification>,
    rx: Receiver<Notification>,
    running: Arc<AtomicBool>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl NotificationPool {
    /// Create a pool holding at most `capacity` notifications
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            running: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether writers may still insert
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Close the pool for writers. Idempotent; blocked inserters observe the
    /// shutdown, and the consumer drains whatever is already queued.
    pub fn shutdown_writers(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Insert a notification, blocking while the pool is full.
    ///
    /// Fails with [`Error::DuplicateNotification`] when the notification's
    /// key is already in flight and with [`Error::PoolShutdown`] when the
    /// pool is closed before the insert lands.
    pub fn insert(&self, notification: Notification) -> Result<()> {
        let key = notification.key.clone();
        {
            let mut in_flight = self.in_flight.lock();
            if !self.is_running() {
                return Err(Error::PoolShutdown);
            }
            if !in_flight.insert(key.clone()) {
                return Err(Error::DuplicateNotification(key));
            }
        }

        let mut pending = notification;
        loop {
            if !self.is_running() {
                self.in_flight.lock().remove(&key);
                return Err(Error::PoolShutdown);
            }
            match self.tx.send_timeout(pending, SHUTDOWN_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => pending = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.in_flight.lock().remove(&key);
                    return Err(Error::PoolShutdown);
                }
            }
        }
    }

    /// Take the next notification, blocking until one arrives.
    ///
    /// Returns `None` once the pool is shut down and drained.
    pub fn next(&self) -> Option<Notification> {
        loop {
            match self.rx.recv_timeout(SHUTDOWN_POLL) {
                Ok(notification) => return Some(notification),
                Err(RecvTimeoutError::Timeout) => {
                    if !self.is_running() && self.rx.is_empty() {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Mark a key as no longer in flight, permitting redelivery
    pub fn complete(&self, key: &str) {
        self.in_flight.lock().remove(key);
    }

    /// Number of queued notifications
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ManagedBuffer;
    use crate::protocol::TransportHeaders;
    use std::thread;

    fn notification(key: &str) -> Notification {
        Notification::new(
            key,
            ManagedBuffer::from(key.as_bytes()),
            TransportHeaders::new(),
        )
    }

    #[test]
    fn test_insert_and_drain_in_order() {
        let pool = NotificationPool::with_capacity(4);
        pool.insert(notification("m1")).unwrap();
        pool.insert(notification("m2")).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.next().unwrap().key, "m1");
        assert_eq!(pool.next().unwrap().key, "m2");
        assert!(pool.is_empty());
    }

    #[test]
    fn test_duplicate_key_rejected_until_completed() {
        let pool = NotificationPool::with_capacity(4);
        pool.insert(notification("m1")).unwrap();
        assert!(matches!(
            pool.insert(notification("m1")),
            Err(Error::DuplicateNotification(_))
        ));
        let taken = pool.next().unwrap();
        pool.complete(&taken.key);
        pool.insert(notification("m1")).unwrap();
    }

    #[test]
    fn test_insert_blocks_until_capacity_frees() {
        let pool = NotificationPool::with_capacity(1);
        pool.insert(notification("m1")).unwrap();

        let inserter = {
            let pool = pool.clone();
            thread::spawn(move || pool.insert(notification("m2")))
        };
        // The second insert is blocked on capacity until the consumer takes
        // the first message.
        thread::sleep(Duration::from_millis(50));
        assert!(!inserter.is_finished());

        assert_eq!(pool.next().unwrap().key, "m1");
        inserter.join().unwrap().unwrap();
        assert_eq!(pool.next().unwrap().key, "m2");
    }

    #[test]
    fn test_shutdown_unblocks_inserter_with_distinguished_error() {
        let pool = NotificationPool::with_capacity(1);
        pool.insert(notification("m1")).unwrap();

        let inserter = {
            let pool = pool.clone();
            thread::spawn(move || pool.insert(notification("m2")))
        };
        thread::sleep(Duration::from_millis(50));
        pool.shutdown_writers();

        let result = inserter.join().unwrap();
        assert!(matches!(result, Err(Error::PoolShutdown)));
    }

    #[test]
    fn test_shutdown_is_idempotent_and_rejects_new_inserts() {
        let pool = NotificationPool::with_capacity(4);
        pool.shutdown_writers();
        pool.shutdown_writers();
        assert!(!pool.is_running());
        assert!(matches!(
            pool.insert(notification("m1")),
            Err(Error::PoolShutdown)
        ));
    }

    #[test]
    fn test_consumer_drains_then_observes_shutdown() {
        let pool = NotificationPool::with_capacity(4);
        pool.insert(notification("m1")).unwrap();
        pool.insert(notification("m2")).unwrap();
        pool.shutdown_writers();

        assert_eq!(pool.next().unwrap().key, "m1");
        assert_eq!(pool.next().unwrap().key, "m2");
        assert!(pool.next().is_none());
    }
}
