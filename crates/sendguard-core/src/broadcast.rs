//! Fan-out of live updates to streaming subscribers.
//!
//! Each subscriber owns a bounded buffer. Publishing never waits: a
//! subscriber whose buffer is full is disconnected and must reconnect, so one
//! slow client cannot hold back the others or the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sync::lock;

struct Inner<T> {
    name: &'static str,
    buffer: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<T>>>,
}

/// Publishes values to every registered subscriber.
pub struct Broadcaster<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Creates a broadcaster whose subscribers each buffer `buffer` values.
    #[must_use]
    pub fn new(name: &'static str, buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                buffer: buffer.max(1),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        lock(&self.inner.subscribers).insert(id, tx);
        debug!(stream = self.inner.name, subscriber = id, "Subscriber registered");

        Subscription {
            id,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// Removes a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        remove(&self.inner, id)
    }

    /// Delivers `value` to every subscriber without waiting.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, value: &T) -> usize {
        let mut subscribers = lock(&self.inner.subscribers);
        let mut delivered = 0;

        subscribers.retain(|id, tx| match tx.try_send(value.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    stream = self.inner.name,
                    subscriber = id,
                    "Slow subscriber disconnected"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        delivered
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Drops subscribers whose receiving side is gone.
    ///
    /// Returns the number removed.
    pub fn reap(&self) -> usize {
        let mut subscribers = lock(&self.inner.subscribers);
        let before = subscribers.len();
        subscribers.retain(|_, tx| !tx.is_closed());
        before - subscribers.len()
    }

    /// Spawns a task that reaps dead subscribers every `interval`.
    pub fn spawn_reaper(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = this.reap();
                        if reaped > 0 {
                            debug!(stream = this.inner.name, reaped, "Reaped dead subscribers");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

fn remove<T>(inner: &Inner<T>, id: u64) -> bool {
    lock(&inner.subscribers).remove(&id).is_some()
}

/// Receiving side of one subscriber. Unregisters itself when dropped.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    owner: Weak<Inner<T>>,
}

impl<T> Subscription<T> {
    /// Subscriber identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next value.
    ///
    /// Returns `None` once the subscriber has been disconnected and its
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            remove(&inner, self.id);
        }
    }
}
