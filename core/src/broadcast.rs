//! Replayable fan-out of change notifications to connected viewers.
//!
//! The [`EventBus`] keeps the last N published records in a ring buffer and
//! pushes every new record to each subscriber's bounded channel. Publishing
//! never waits on a subscriber: a full channel means that subscriber misses
//! the record and must recover it with [`EventBus::replay_after`] on
//! reconnect.
//!
//! # Example
//!
//! ```rust
//! use livemark_core::broadcast::EventBus;
//!
//! let bus = EventBus::new();
//! let mut subscription = bus.subscribe();
//!
//! let first = bus.publish("one".to_string());
//! let second = bus.publish("two".to_string());
//! assert!(second > first);
//!
//! assert_eq!(subscription.try_recv().unwrap().payload, "one");
//! assert_eq!(bus.replay_after(first).len(), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::types::ChangeNotification;

/// Records retained for replay by default.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Per-subscriber channel depth by default. Enough to absorb short bursts.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

/// A published payload with its position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: u64,
    pub payload: String,
}

/// A subscriber's receiving end.
///
/// Dropping the subscription closes the channel; the bus prunes it on the
/// next publish. Call [`EventBus::unsubscribe`] to remove it immediately.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<EventRecord>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next record. `None` once the subscription was removed.
    pub async fn recv(&mut self) -> Option<EventRecord> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<EventRecord, TryRecvError> {
        self.receiver.try_recv()
    }
}

#[derive(Debug)]
struct History {
    next_id: u64,
    records: VecDeque<EventRecord>,
}

/// In-memory, bounded, replayable broadcast channel.
///
/// Lock order is history, then subscribers. Fan-out runs while the history
/// lock is held, so every subscriber observes strictly increasing IDs even
/// with concurrent publishers.
#[derive(Debug)]
pub struct EventBus {
    history: Mutex<History>,
    subscribers: RwLock<HashMap<u64, mpsc::Sender<EventRecord>>>,
    next_subscriber: AtomicU64,
    capacity: usize,
    subscriber_buffer: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with [`DEFAULT_HISTORY_CAPACITY`] and
    /// [`DEFAULT_SUBSCRIBER_BUFFER`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY, DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Creates a bus with explicit sizes. Zero values are raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize, subscriber_buffer: usize) -> Self {
        let capacity = capacity.max(1);
        let subscriber_buffer = subscriber_buffer.max(1);
        debug!(capacity, subscriber_buffer, "Created event bus");
        Self {
            history: Mutex::new(History {
                next_id: 1,
                records: VecDeque::with_capacity(capacity),
            }),
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            capacity,
            subscriber_buffer,
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `payload` to the history and offers it to every subscriber.
    ///
    /// Returns the assigned ID. Never blocks on a subscriber.
    pub fn publish(&self, payload: String) -> u64 {
        let mut history = self.lock_history();
        let id = history.next_id;
        history.next_id += 1;

        let record = EventRecord { id, payload };
        if history.records.len() >= self.capacity {
            history.records.pop_front();
        }
        history.records.push_back(record.clone());

        let mut closed = Vec::new();
        {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (subscriber, sender) in subscribers.iter() {
                match sender.try_send(record.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        trace!(subscriber, id, "Subscriber buffer full, record dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*subscriber),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for subscriber in closed {
                subscribers.remove(&subscriber);
                debug!(subscriber, "Pruned closed subscriber");
            }
        }

        id
    }

    /// Serializes and publishes a notification.
    pub fn publish_notification(&self, notification: &ChangeNotification) -> Option<u64> {
        match serde_json::to_string(notification) {
            Ok(payload) => {
                let id = self.publish(payload);
                debug!(id, kind = %notification.kind, path = %notification.path, "Published change");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "Failed to serialize change notification");
                None
            }
        }
    }

    /// Registers a new subscriber that receives records published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.subscriber_buffer);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut subscribers = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.insert(id, sender);
            subscribers.len()
        };
        debug!(subscriber = id, subscriber_count = count, "New subscriber added");
        Subscription { id, receiver }
    }

    /// Subscribes and replays in one step.
    ///
    /// The replay and the registration happen under the history lock, so
    /// the returned records and the live stream neither overlap nor leave a
    /// gap. With `last_id` of `None` the replay is empty.
    #[must_use]
    pub fn subscribe_from(&self, last_id: Option<u64>) -> (Vec<EventRecord>, Subscription) {
        let history = self.lock_history();
        let replay = last_id
            .map(|id| Self::records_after(&history, id))
            .unwrap_or_default();
        let subscription = self.subscribe();
        drop(history);
        (replay, subscription)
    }

    /// Removes a subscriber; its receiver observes end of stream.
    pub fn unsubscribe(&self, id: u64) {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!(subscriber = id, "Subscriber removed");
        }
    }

    /// Returns every retained record after `last_id`, oldest first.
    ///
    /// An ID no longer (or never) in the buffer yields an empty list: the
    /// gap cannot be recovered and the caller should resync.
    #[must_use]
    pub fn replay_after(&self, last_id: u64) -> Vec<EventRecord> {
        Self::records_after(&self.lock_history(), last_id)
    }

    fn records_after(history: &History, last_id: u64) -> Vec<EventRecord> {
        match history.records.iter().position(|r| r.id == last_id) {
            Some(index) => history.records.iter().skip(index + 1).cloned().collect(),
            None => {
                trace!(last_id, "Replay requested for unknown id");
                Vec::new()
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// ID of the most recent record, if any was published.
    #[must_use]
    pub fn last_id(&self) -> Option<u64> {
        self.lock_history().records.back().map(|r| r.id)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
