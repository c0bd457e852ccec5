//! Ordered control value cache and one-shot capture
//!
//! The bus's concurrent path can reorder deliveries; consumers that need
//! the latest value per control key with read-after-write consistency use
//! this cache instead. Each key gets a dedicated single-writer cell fed by
//! an ordered subscription, so values land in strict arrival order.
//!
//! `capture_next` supports interactive "move the control you want to bind"
//! tooling: it blocks until the first control-change anywhere, exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::bus::{EventBus, MidiEvent, SubscriptionId};
use crate::device::DeviceInfo;
use crate::keys::{command_key, control_key, device_key, EventKey};
use crate::midi::{MidiCommand, MidiMessage};

/// Most recently observed (controller, value) pair for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedControl {
    pub controller: u8,
    pub value: u8,
}

/// Single-writer cell holding the latest value for one control key
///
/// Written only from the ordered delivery path; readers get whatever the
/// most recent completed write was.
#[derive(Default)]
pub struct ControlCell {
    latest: Mutex<Option<CapturedControl>>,
}

impl ControlCell {
    pub fn get(&self) -> Option<CapturedControl> {
        *self.latest.lock()
    }
}

/// Result of a one-shot capture
#[derive(Debug, Clone)]
pub struct Capture {
    pub controller: u8,
    pub value: u8,
    pub event: Arc<MidiEvent>,
}

impl Capture {
    pub fn device(&self) -> &DeviceInfo {
        &self.event.device
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no control change arrived within {0:?}")]
    Timeout(Duration),

    #[error("event bus dropped before a control change arrived")]
    BusClosed,

    #[error("captured event was not a control change: {0}")]
    NotAControlChange(String),
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Per-key latest-value store plus one-shot capture
pub struct ControlValueCache {
    bus: Arc<EventBus>,
    instance: u64,
    next_capture: AtomicU64,
    cells: DashMap<EventKey, Arc<ControlCell>>,
}

impl ControlValueCache {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            next_capture: AtomicU64::new(0),
            cells: DashMap::new(),
        }
    }

    /// The cell tracking the latest value on `key`, created on first use
    ///
    /// Memoized: repeated calls for the same key return the same cell. The
    /// backing subscription uses ordered delivery, so after a producer's
    /// publish returns, its value is visible in the cell.
    pub fn latest_for(&self, key: &EventKey) -> Arc<ControlCell> {
        self.cells
            .entry(key.clone())
            .or_insert_with(|| {
                let cell = Arc::new(ControlCell::default());
                let cell_in = cell.clone();
                let id = SubscriptionId::new(
                    format!("capture-{}", self.instance),
                    format!("cell:{key}"),
                );
                self.bus.subscribe_ordered(
                    key.clone(),
                    Arc::new(move |event| {
                        if let (Some(controller), Some(value)) =
                            (event.message.primary_id(), event.message.value())
                        {
                            *cell_in.latest.lock() = Some(CapturedControl { controller, value });
                        }
                    }),
                    id,
                );
                cell
            })
            .clone()
    }

    /// Latest value for `key` without keeping the cell, if one exists yet
    pub fn latest(&self, key: &EventKey) -> Option<CapturedControl> {
        self.cells.get(key).and_then(|cell| cell.get())
    }

    /// Block until the first control-change event from any device
    ///
    /// Resolves exactly once; events after the first are not observed by
    /// this call. No timeout: intended for interactive tooling where the
    /// user is about to touch a control. Use [`capture_next_timeout`] when
    /// an unbounded wait is a hazard.
    ///
    /// [`capture_next_timeout`]: ControlValueCache::capture_next_timeout
    pub async fn capture_next(&self) -> Result<Capture, CaptureError> {
        let rx = self
            .bus
            .subscribe_once(command_key(MidiCommand::ControlChange), self.capture_id());
        let event = rx.await.map_err(|_| CaptureError::BusClosed)?;
        Self::into_capture(event)
    }

    /// [`capture_next`] with an upper bound on the wait
    ///
    /// [`capture_next`]: ControlValueCache::capture_next
    pub async fn capture_next_timeout(&self, limit: Duration) -> Result<Capture, CaptureError> {
        let id = self.capture_id();
        let rx = self
            .bus
            .subscribe_once(command_key(MidiCommand::ControlChange), id.clone());

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(event)) => Self::into_capture(event),
            Ok(Err(_)) => Err(CaptureError::BusClosed),
            Err(_) => {
                // Remove the now-useless one-shot so it cannot linger.
                self.bus.unsubscribe(&id);
                Err(CaptureError::Timeout(limit))
            }
        }
    }

    /// Capture the next control-change and return its device-granularity key
    pub async fn capture_next_device_key(&self) -> Result<EventKey, CaptureError> {
        let capture = self.capture_next().await?;
        Ok(device_key(capture.device(), MidiCommand::ControlChange))
    }

    /// Capture the next control-change and return its control-granularity key
    pub async fn capture_next_control_key(&self) -> Result<EventKey, CaptureError> {
        let capture = self.capture_next().await?;
        Ok(control_key(
            capture.device(),
            MidiCommand::ControlChange,
            capture.controller,
        ))
    }

    fn capture_id(&self) -> SubscriptionId {
        let seq = self.next_capture.fetch_add(1, Ordering::Relaxed);
        SubscriptionId::new(format!("capture-{}", self.instance), format!("next-{seq}"))
    }

    fn into_capture(event: Arc<MidiEvent>) -> Result<Capture, CaptureError> {
        match event.message {
            MidiMessage::ControlChange { cc, value, .. } => Ok(Capture {
                controller: cc,
                value,
                event,
            }),
            // Only reachable if something publishes a foreign message type
            // under the control-change command key.
            ref other => Err(CaptureError::NotAControlChange(other.to_string())),
        }
    }
}
