//! Polyphonic voice manager
//!
//! Consumes note-on/note-off events and drives a downstream sound source
//! through the instantiate/set-parameter contract. Release is signalled by
//! zeroing the gate parameter.
//!
//! Per note this is a two-state machine: inactive -> active on note-on ->
//! inactive on note-off. A note-on for an already-active note wins: the new
//! voice replaces the old entry and the displaced handle is abandoned, not
//! released (the source may let it decay on its own).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::bus::{EventBus, SubscriptionId};
use crate::keys::command_key;
use crate::midi::{MidiCommand, MidiMessage};

/// Parameter name used to signal release on a running voice
pub const GATE_PARAM: &str = "gate";

/// Opaque handle to one running voice in the sound source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHandle(pub u64);

/// Downstream sound-generation collaborator
pub trait SoundSource: Send + Sync {
    /// Start a voice for a note; returns a handle to address it later
    fn instantiate(&self, note: u8, velocity: u8) -> SourceHandle;

    /// Set a named parameter on a running voice
    fn set_parameter(&self, handle: SourceHandle, name: &str, value: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStatus {
    Playing,
    Stopped,
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Active-voice lifecycle manager
pub struct VoiceManager {
    bus: Arc<EventBus>,
    voices: Arc<Mutex<HashMap<u8, SourceHandle>>>,
    status: Mutex<VoiceStatus>,
    note_on_id: SubscriptionId,
    note_off_id: SubscriptionId,
}

impl VoiceManager {
    /// Subscribe to note-on/note-off at command granularity and start
    /// managing voices against `source`.
    ///
    /// Ordered delivery: handlers run on each device's producer thread, so
    /// a note-off never overtakes its note-on from the same device.
    pub fn start(bus: Arc<EventBus>, source: Arc<dyn SoundSource>) -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let owner = format!("voices-{instance}");
        let note_on_id = SubscriptionId::new(owner.clone(), "note-on");
        let note_off_id = SubscriptionId::new(owner, "note-off");

        let voices: Arc<Mutex<HashMap<u8, SourceHandle>>> = Arc::new(Mutex::new(HashMap::new()));

        let on_voices = voices.clone();
        let on_source = source.clone();
        bus.subscribe_ordered(
            command_key(MidiCommand::NoteOn),
            Arc::new(move |event| {
                if let MidiMessage::NoteOn { note, velocity, .. } = event.message {
                    let handle = on_source.instantiate(note, velocity);
                    if on_voices.lock().insert(note, handle).is_some() {
                        trace!(note, "note restruck, previous voice abandoned");
                    }
                }
            }),
            note_on_id.clone(),
        );

        let off_voices = voices.clone();
        bus.subscribe_ordered(
            command_key(MidiCommand::NoteOff),
            Arc::new(move |event| {
                if let MidiMessage::NoteOff { note, .. } = event.message {
                    match off_voices.lock().remove(&note) {
                        Some(handle) => source.set_parameter(handle, GATE_PARAM, 0.0),
                        // Stray or redundant note-off; devices send these.
                        None => trace!(note, "note-off with no active voice"),
                    }
                }
            }),
            note_off_id.clone(),
        );

        Self {
            bus,
            voices,
            status: Mutex::new(VoiceStatus::Playing),
            note_on_id,
            note_off_id,
        }
    }

    /// Unsubscribe both handlers. Remaining voices are abandoned, not
    /// released. Idempotent.
    pub fn stop(&self) {
        self.bus.unsubscribe(&self.note_on_id);
        self.bus.unsubscribe(&self.note_off_id);
        *self.status.lock() = VoiceStatus::Stopped;
    }

    pub fn status(&self) -> VoiceStatus {
        *self.status.lock()
    }

    pub fn active_count(&self) -> usize {
        self.voices.lock().len()
    }

    /// Handle of the active voice for a note, if any
    pub fn voice_for(&self, note: u8) -> Option<SourceHandle> {
        self.voices.lock().get(&note).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MidiEvent;
    use crate::device::DeviceInfo;

    /// Records instantiations and released handles
    struct TestSource {
        next: AtomicU64,
        started: Mutex<Vec<(u8, u8, SourceHandle)>>,
        released: Mutex<Vec<SourceHandle>>,
    }

    impl TestSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next: AtomicU64::new(1),
                started: Mutex::new(Vec::new()),
                released: Mutex::new(Vec::new()),
            })
        }
    }

    impl SoundSource for TestSource {
        fn instantiate(&self, note: u8, velocity: u8) -> SourceHandle {
            let handle = SourceHandle(self.next.fetch_add(1, Ordering::SeqCst));
            self.started.lock().push((note, velocity, handle));
            handle
        }

        fn set_parameter(&self, handle: SourceHandle, name: &str, value: f64) {
            assert_eq!(name, GATE_PARAM);
            assert_eq!(value, 0.0);
            self.released.lock().push(handle);
        }
    }

    fn note_event(message: MidiMessage) -> Arc<MidiEvent> {
        Arc::new(MidiEvent {
            device: DeviceInfo::new("Akai", "MPK Mini", "", "akai-1"),
            message,
            timestamp_us: None,
        })
    }

    fn publish_on(bus: &EventBus, note: u8, velocity: u8) {
        bus.publish(
            &command_key(MidiCommand::NoteOn),
            note_event(MidiMessage::NoteOn { channel: 0, note, velocity }),
        );
    }

    fn publish_off(bus: &EventBus, note: u8) {
        bus.publish(
            &command_key(MidiCommand::NoteOff),
            note_event(MidiMessage::NoteOff { channel: 0, note, velocity: 0 }),
        );
    }

    #[tokio::test]
    async fn test_note_lifecycle() {
        let bus = Arc::new(EventBus::new());
        let source = TestSource::new();
        let manager = VoiceManager::start(bus.clone(), source.clone());

        publish_on(&bus, 60, 100);
        assert_eq!(manager.active_count(), 1);
        let handle = manager.voice_for(60).unwrap();

        publish_off(&bus, 60);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(*source.released.lock(), vec![handle]);
    }

    #[tokio::test]
    async fn test_restrike_last_note_on_wins() {
        let bus = Arc::new(EventBus::new());
        let source = TestSource::new();
        let manager = VoiceManager::start(bus.clone(), source.clone());

        publish_on(&bus, 60, 100);
        let first = manager.voice_for(60).unwrap();
        publish_on(&bus, 60, 50);
        let second = manager.voice_for(60).unwrap();

        // Exactly one active voice for the note, owned by the second strike.
        assert_ne!(first, second);
        assert_eq!(manager.active_count(), 1);

        publish_off(&bus, 60);
        // Only the second handle is released; the first was abandoned.
        assert_eq!(*source.released.lock(), vec![second]);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stray_note_off_is_ignored() {
        let bus = Arc::new(EventBus::new());
        let source = TestSource::new();
        let manager = VoiceManager::start(bus.clone(), source.clone());

        publish_off(&bus, 61);
        assert_eq!(manager.active_count(), 0);
        assert!(source.released.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let source = TestSource::new();
        let manager = VoiceManager::start(bus.clone(), source.clone());

        publish_on(&bus, 60, 100);
        manager.stop();
        assert_eq!(manager.status(), VoiceStatus::Stopped);

        publish_on(&bus, 62, 90);
        publish_off(&bus, 60);

        // No handler ran after stop: the voice map is untouched and the
        // remaining handle stays abandoned.
        assert_eq!(manager.active_count(), 1);
        assert!(source.released.lock().is_empty());
        assert_eq!(source.started.lock().len(), 1);

        // stop is idempotent
        manager.stop();
        assert_eq!(manager.status(), VoiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_two_instances_do_not_collide() {
        let bus = Arc::new(EventBus::new());
        let source_a = TestSource::new();
        let source_b = TestSource::new();
        let a = VoiceManager::start(bus.clone(), source_a.clone());
        let b = VoiceManager::start(bus.clone(), source_b.clone());

        a.stop();
        publish_on(&bus, 60, 100);

        // Stopping one instance must not detach the other.
        assert_eq!(a.active_count(), 0);
        assert_eq!(b.active_count(), 1);
    }
}
