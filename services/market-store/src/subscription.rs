//! Subscriber registry and lossy fan-out
//!
//! Every store keeps one hub. Ids come from a per-hub counter and are never
//! reused, even after the subscriber leaves.
//!
//! Delivery is at-most-once: a subscriber whose channel is full (or whose
//! receiver is gone) misses that batch. The writer never blocks on a slow
//! consumer; consumers that need every update read the store instead.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Channel full; the batch was dropped for this subscriber.
    Full,
    /// Receiver dropped; the batch was dropped for this subscriber.
    Closed,
}

#[derive(Debug)]
struct HubState<S> {
    last_id: u64,
    subscribers: BTreeMap<u64, S>,
}

/// Registry of subscribers of one store.
#[derive(Debug)]
pub struct SubscriptionHub<S> {
    /// Store name used in log lines.
    name: &'static str,
    state: Mutex<HubState<S>>,
}

impl<S> SubscriptionHub<S> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(HubState {
                last_id: 0,
                subscribers: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber and return its id.
    pub fn subscribe(&self, subscriber: S) -> u64 {
        let mut state = self.lock();
        state.last_id += 1;
        let id = state.last_id;
        state.subscribers.insert(id, subscriber);
        debug!(store = self.name, subscriber_id = id, "Subscriber added");
        id
    }

    /// Remove a subscriber.
    ///
    /// Removing from an empty hub is a no-op. Removing an unknown id while
    /// other subscribers are registered is an error.
    pub fn unsubscribe(&self, id: u64) -> Result<()> {
        let mut state = self.lock();
        if state.subscribers.is_empty() {
            debug!(store = self.name, subscriber_id = id, "Unsubscribe called, no subscribers connected");
            return Ok(());
        }
        match state.subscribers.remove(&id) {
            Some(_) => {
                debug!(store = self.name, subscriber_id = id, "Subscriber removed");
                Ok(())
            }
            None => {
                warn!(store = self.name, subscriber_id = id, "Unsubscribe called for unknown subscriber");
                Err(StoreError::SubscriberNotFound(id))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().subscribers.is_empty()
    }

    /// Visit every subscriber in id order while holding the registry lock.
    ///
    /// `visit` must not block.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(u64, &S),
    {
        let state = self.lock();
        if state.subscribers.is_empty() {
            debug!(store = self.name, "No subscribers connected");
            return;
        }
        for (id, subscriber) in &state.subscribers {
            visit(*id, subscriber);
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: Clone> SubscriptionHub<mpsc::Sender<T>> {
    /// Offer `batch` to every subscriber without blocking.
    ///
    /// Returns how many subscribers accepted it.
    pub fn notify(&self, batch: &T) -> usize {
        let mut sent = 0;
        let name = self.name;
        self.for_each(|id, sender| {
            if try_deliver(name, id, sender, batch.clone()) == Delivery::Sent {
                sent += 1;
            }
        });
        sent
    }
}

/// Non-blocking send of one batch to one subscriber.
pub fn try_deliver<T>(store: &'static str, id: u64, sender: &mpsc::Sender<T>, batch: T) -> Delivery {
    match sender.try_send(batch) {
        Ok(()) => {
            debug!(store, subscriber_id = id, "Channel updated for subscriber successfully");
            Delivery::Sent
        }
        Err(TrySendError::Full(_)) => {
            debug!(store, subscriber_id = id, "Channel full, batch dropped for subscriber");
            Delivery::Full
        }
        Err(TrySendError::Closed(_)) => {
            debug!(store, subscriber_id = id, "Channel closed, batch dropped for subscriber");
            Delivery::Closed
        }
    }
}
