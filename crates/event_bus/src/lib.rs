//! Fan-out of state-change events to live observers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a full queue
//! loses that one event for that one subscriber, and only a closed queue gets
//! the subscriber dropped from the registry.

use std::{
    collections::{HashMap, VecDeque},
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    task::{Context, Poll},
};

use futures::Stream;
use shared::protocol::Event;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info};

pub const DEFAULT_CAPACITY: usize = 1000;

/// Serialized event as handed to subscribers.
pub type Payload = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
    pub disconnected: usize,
}

struct Inner {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Payload>>>,
}

impl Inner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Payload>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: SubscriberId) -> bool {
        self.subscribers().remove(&id).is_some()
    }
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with(std::iter::empty())
    }

    /// Registers a subscriber that yields every event of `replay` before any
    /// live event. The replay is held outside the bounded live queue, so it is
    /// never truncated and does not use up live capacity.
    pub fn subscribe_with<I>(&self, replay: I) -> Subscription
    where
        I: IntoIterator<Item = Event>,
    {
        let replay: VecDeque<Payload> = replay
            .into_iter()
            .filter_map(|event| serialize(&event))
            .collect();
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        self.inner.subscribers().insert(id, tx);
        debug!(subscriber = id.0, replay = replay.len(), "subscriber registered");

        Subscription {
            id,
            replay,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Serializes `event` once and offers it to every subscriber without
    /// blocking.
    pub fn publish(&self, event: &Event) -> Delivery {
        let mut delivery = Delivery::default();
        let Some(payload) = serialize(event) else {
            return delivery;
        };

        self.inner.subscribers().retain(|id, tx| {
            match tx.try_send(Arc::clone(&payload)) {
                Ok(()) => {
                    delivery.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    debug!(subscriber = id.0, "subscriber queue full; event dropped");
                    delivery.dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    info!(subscriber = id.0, "subscriber channel closed; removing");
                    delivery.disconnected += 1;
                    false
                }
            }
        });
        delivery
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

fn serialize(event: &Event) -> Option<Payload> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Payload::from(text)),
        Err(error) => {
            error!(%error, ?event, "failed to serialize event");
            None
        }
    }
}

/// Receiving end of one subscriber. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    replay: VecDeque<Payload>,
    rx: mpsc::Receiver<Payload>,
    bus: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Payload> {
        match self.replay.pop_front() {
            Some(payload) => Some(payload),
            None => self.rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Option<Payload> {
        self.replay.pop_front().or_else(|| self.rx.try_recv().ok())
    }

    /// Stops accepting new events; the bus discards this subscriber on its
    /// next publish. Already queued events can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for Subscription {
    type Item = Payload;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(payload) = self.replay.pop_front() {
            return Poll::Ready(Some(payload));
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            if inner.remove(self.id) {
                debug!(subscriber = self.id.0, "subscriber released");
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
