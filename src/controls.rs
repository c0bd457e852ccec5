//! Controller state tracker
//!
//! Routes control-change events through a per-instrument mapping into a
//! shared parameter map, invoking a handler after each write. Updates apply
//! in arrival order: the tracker subscribes in ordered mode, so scaling and
//! the state write happen on the producing thread before the next event
//! from that device is dispatched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::bus::{EventBus, SubscriptionId};
use crate::keys::command_key;
use crate::midi::{MidiCommand, MidiMessage};

/// Scaling function from raw 0-127 to a semantic value
pub type ScaleFn = Arc<dyn Fn(u8) -> f64 + Send + Sync>;

/// One mapped controller: parameter name plus scaling
#[derive(Clone)]
pub struct ControlTarget {
    pub name: String,
    pub scale: ScaleFn,
}

/// Immutable mapping from raw controller id to target parameter
///
/// Built once by the caller; controllers absent from the mapping are
/// ignored by the tracker (see [`ControlTracker`]).
#[derive(Clone, Default)]
pub struct ControlMapping {
    targets: HashMap<u8, ControlTarget>,
}

impl ControlMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of one controller
    pub fn with(
        mut self,
        controller: u8,
        name: impl Into<String>,
        scale: impl Fn(u8) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.targets.insert(
            controller,
            ControlTarget {
                name: name.into(),
                scale: Arc::new(scale),
            },
        );
        self
    }

    pub fn get(&self, controller: u8) -> Option<&ControlTarget> {
        self.targets.get(&controller)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Last-applied semantic value per parameter name
///
/// Shared with the caller; mutated only by the owning tracker.
pub type ControlState = Arc<Mutex<HashMap<String, f64>>>;

/// Callback invoked after each state write
pub type ControlHandler = Arc<dyn Fn(&str, f64) + Send + Sync>;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Ordered consumer of control-change events
///
/// A control-change whose controller id is absent from the mapping is
/// ignored with a debug log; physical devices routinely emit controllers
/// outside the mapped set.
pub struct ControlTracker {
    bus: Arc<EventBus>,
    id: SubscriptionId,
}

impl ControlTracker {
    pub fn start(
        bus: Arc<EventBus>,
        state: ControlState,
        mapping: ControlMapping,
        handler: ControlHandler,
    ) -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let id = SubscriptionId::new(format!("controls-{instance}"), "control-change");

        bus.subscribe_ordered(
            command_key(MidiCommand::ControlChange),
            Arc::new(move |event| {
                let MidiMessage::ControlChange { cc, value, .. } = event.message else {
                    return;
                };

                match mapping.get(cc) {
                    Some(target) => {
                        let semantic = (target.scale)(value);
                        state.lock().insert(target.name.clone(), semantic);
                        handler(&target.name, semantic);
                    }
                    None => debug!(cc, value, "unmapped controller, ignoring"),
                }
            }),
            id.clone(),
        );

        Self { bus, id }
    }

    /// Unsubscribe the tracker; the shared state keeps its last values.
    pub fn stop(&self) {
        self.bus.unsubscribe(&self.id);
    }
}
