//! In-process event bus with two delivery modes
//!
//! Subscriptions are keyed by exact [`EventKey`]. Layered granularity comes
//! from the publisher side: the registry emits one event per granularity
//! level within a single publish step, so a command-level subscriber and a
//! control-level subscriber each see exactly one delivery per message.
//!
//! Delivery modes:
//! - **ordered**: the handler runs synchronously on the publishing thread.
//!   Each attached device has a single producer thread, so events from one
//!   device reach an ordered handler in arrival order and never overlap.
//! - **concurrent**: the handler is spawned onto the tokio worker pool; no
//!   ordering guarantee across invocations.
//! - **once**: a oneshot that resolves with the first matching event and
//!   can never fire again.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::device::DeviceInfo;
use crate::keys::EventKey;
use crate::midi::MidiMessage;

/// One routed message: the parsed message plus its originating device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEvent {
    pub device: DeviceInfo,
    pub message: MidiMessage,
    /// Backend timestamp in microseconds, when the backend provides one
    pub timestamp_us: Option<u64>,
}

/// Handler invoked per delivered event
pub type EventHandler = Arc<dyn Fn(Arc<MidiEvent>) + Send + Sync>;

/// Caller-visible subscription identity: component instance plus role
///
/// Explicit so unsubscription is deterministic and testable. Components
/// embed an instance counter in `owner` to keep two instances of the same
/// component apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    pub owner: String,
    pub role: String,
}

impl SubscriptionId {
    pub fn new(owner: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            role: role.into(),
        }
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.owner, self.role)
    }
}

enum Delivery {
    Ordered(EventHandler),
    Concurrent(EventHandler),
    /// Slot is emptied on first delivery; a spent subscription is pruned
    /// on the publish that fired it.
    Once(Mutex<Option<oneshot::Sender<Arc<MidiEvent>>>>),
}

struct Subscription {
    id: SubscriptionId,
    delivery: Delivery,
}

/// Keyed publish/subscribe bus
pub struct EventBus {
    topics: RwLock<HashMap<EventKey, Vec<Arc<Subscription>>>>,
    /// Runtime handle for spawning concurrent-mode handlers; captured at
    /// construction so publishes from backend callback threads can spawn.
    runtime: tokio::runtime::Handle,
}

impl EventBus {
    /// Create a bus. Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    /// Publish one event to every subscriber of exactly this key
    pub fn publish(&self, key: &EventKey, event: Arc<MidiEvent>) {
        let subs: Vec<Arc<Subscription>> = {
            let topics = self.topics.read();
            match topics.get(key) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        trace!(key = %key, subscribers = subs.len(), "dispatching event");

        let mut fired_once = false;
        for sub in &subs {
            match &sub.delivery {
                Delivery::Ordered(handler) => handler(event.clone()),
                Delivery::Concurrent(handler) => {
                    let handler = handler.clone();
                    let event = event.clone();
                    self.runtime.spawn(async move {
                        handler(event);
                    });
                }
                Delivery::Once(slot) => {
                    if let Some(tx) = slot.lock().take() {
                        // Receiver may have been dropped (e.g. a timed-out
                        // capture); the send result is irrelevant either way.
                        let _ = tx.send(event.clone());
                        fired_once = true;
                    }
                }
            }
        }

        if fired_once {
            self.prune_spent(key);
        }
    }

    /// Subscribe with synchronous, per-producer-ordered delivery
    pub fn subscribe_ordered(&self, key: EventKey, handler: EventHandler, id: SubscriptionId) {
        self.insert(key, id, |h| Delivery::Ordered(h), handler);
    }

    /// Subscribe with pool-dispatched delivery (no ordering guarantee)
    pub fn subscribe_concurrent(&self, key: EventKey, handler: EventHandler, id: SubscriptionId) {
        self.insert(key, id, |h| Delivery::Concurrent(h), handler);
    }

    /// Subscribe for exactly one event; the returned receiver resolves with
    /// the first event published on `key` after this call.
    pub fn subscribe_once(
        &self,
        key: EventKey,
        id: SubscriptionId,
    ) -> oneshot::Receiver<Arc<MidiEvent>> {
        let (tx, rx) = oneshot::channel();
        let sub = Arc::new(Subscription {
            id,
            delivery: Delivery::Once(Mutex::new(Some(tx))),
        });
        self.topics.write().entry(key).or_default().push(sub);
        rx
    }

    /// Remove every subscription with this id
    ///
    /// Safe no-op for unknown or already-removed ids. Effective no later
    /// than the next dispatched event; concurrent-mode invocations already
    /// spawned may still complete.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        let mut removed = false;
        topics.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.id != *id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        if removed {
            debug!(id = %id, "unsubscribed");
        } else {
            trace!(id = %id, "unsubscribe of unknown id (no-op)");
        }
        removed
    }

    /// Number of live subscriptions on a key
    pub fn subscriber_count(&self, key: &EventKey) -> usize {
        self.topics.read().get(key).map(|s| s.len()).unwrap_or(0)
    }

    fn insert(
        &self,
        key: EventKey,
        id: SubscriptionId,
        wrap: impl FnOnce(EventHandler) -> Delivery,
        handler: EventHandler,
    ) {
        let sub = Arc::new(Subscription {
            id,
            delivery: wrap(handler),
        });
        let mut topics = self.topics.write();
        let subs = topics.entry(key).or_default();
        if subs.iter().any(|s| s.id == sub.id) {
            debug!(id = %sub.id, "duplicate subscription id on key");
        }
        subs.push(sub);
    }

    /// Drop one-shot subscriptions whose slot has been consumed
    fn prune_spent(&self, key: &EventKey) {
        let mut topics = self.topics.write();
        if let Some(subs) = topics.get_mut(key) {
            subs.retain(|s| match &s.delivery {
                Delivery::Once(slot) => slot.lock().is_some(),
                _ => true,
            });
            if subs.is_empty() {
                topics.remove(key);
            }
        }
    }
}
