//! Layered MIDI event routing
//!
//! Raw messages from hotplugged input devices are republished onto a keyed
//! pub/sub bus at three address granularities (command, device, control),
//! with a choice of concurrent fan-out or strict per-source-ordered
//! delivery. Stateful consumers build on top: a polyphonic voice manager,
//! a controller state tracker, and an ordered latest-value cache with
//! one-shot capture for interactive control binding.

pub mod bus;
pub mod capture;
pub mod cli;
pub mod config;
pub mod controls;
pub mod device;
pub mod keys;
pub mod midi;
pub mod monitor;
pub mod ports;
pub mod registry;
pub mod voices;

pub use bus::{EventBus, EventHandler, MidiEvent, SubscriptionId};
pub use capture::{Capture, CaptureError, CapturedControl, ControlValueCache};
pub use config::AppConfig;
pub use controls::{ControlMapping, ControlState, ControlTracker};
pub use device::DeviceInfo;
pub use keys::{command_key, control_key, device_key, EventKey};
pub use midi::{MidiCommand, MidiMessage};
pub use ports::{MidiGateway, MidirGateway};
pub use registry::DeviceRegistry;
pub use voices::{SoundSource, SourceHandle, VoiceManager};
