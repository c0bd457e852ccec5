//! Hierarchical event keys
//!
//! Events are addressed by an ordered sequence of atoms at three
//! granularities:
//!
//! - command key: `[midi, command]`, any event of that command
//! - device key: `[midi, vendor, name, description, command]`, one device
//!   and one command
//! - control key: device key + `[control_id]`, one control on one device
//!
//! A control key is always the matching device key extended by the control
//! id, so callers can derive one from the other without re-reading the
//! device record.

use std::fmt;

use crate::device::DeviceInfo;
use crate::midi::MidiCommand;

/// Domain tag, the first atom of every key
pub const DOMAIN: &str = "midi";

/// Ordered sequence of atoms addressing a class of events
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey(Vec<String>);

impl EventKey {
    /// Build a key from raw atoms. The callers below are the normal way to
    /// construct keys; this exists for tests and ad-hoc subscriptions.
    pub fn from_atoms<I, S>(atoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventKey(atoms.into_iter().map(Into::into).collect())
    }

    pub fn atoms(&self) -> &[String] {
        &self.0
    }

    /// A new key with one atom appended
    pub fn extended(&self, atom: impl Into<String>) -> Self {
        let mut atoms = self.0.clone();
        atoms.push(atom.into());
        EventKey(atoms)
    }

    /// True when `self` is a (non-strict) prefix of `other`
    pub fn is_prefix_of(&self, other: &EventKey) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Command-granularity key: any event of this command, from any device
pub fn command_key(command: MidiCommand) -> EventKey {
    EventKey::from_atoms([DOMAIN, command.as_str()])
}

/// Device-granularity key: one command from one physical device
pub fn device_key(device: &DeviceInfo, command: MidiCommand) -> EventKey {
    EventKey::from_atoms([
        DOMAIN,
        device.vendor.as_str(),
        device.name.as_str(),
        device.description.as_str(),
        command.as_str(),
    ])
}

/// Control-granularity key: one control id on one device
pub fn control_key(device: &DeviceInfo, command: MidiCommand, control_id: u8) -> EventKey {
    device_key(device, command).extended(control_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_device() -> DeviceInfo {
        DeviceInfo::new("Korg", "nanoKONTROL2", "SLIDER/KNOB", "k1")
    }

    #[test]
    fn test_command_key_shape() {
        let key = command_key(MidiCommand::NoteOn);
        assert_eq!(key.atoms(), &["midi", "note_on"]);
    }

    #[test]
    fn test_device_key_shape() {
        let key = device_key(&test_device(), MidiCommand::ControlChange);
        assert_eq!(
            key.atoms(),
            &["midi", "Korg", "nanoKONTROL2", "SLIDER/KNOB", "control_change"]
        );
    }

    #[test]
    fn test_control_key_extends_device_key() {
        let dev = test_device();
        let dk = device_key(&dev, MidiCommand::ControlChange);
        let ck = control_key(&dev, MidiCommand::ControlChange, 5);

        assert_eq!(ck, dk.extended("5"));
        assert!(dk.is_prefix_of(&ck));
        assert!(!ck.is_prefix_of(&dk));
    }

    #[test]
    fn test_prefix_is_reflexive() {
        let key = command_key(MidiCommand::NoteOff);
        assert!(key.is_prefix_of(&key));
    }

    #[test]
    fn test_display() {
        let key = command_key(MidiCommand::PitchBend);
        assert_eq!(key.to_string(), "midi/pitch_bend");
    }

    proptest! {
        // Prefix invariant over arbitrary device records and control ids
        #[test]
        fn prop_control_key_is_device_key_plus_id(
            vendor in "[a-zA-Z0-9 ]{0,16}",
            name in "[a-zA-Z0-9 ]{0,16}",
            description in "[a-zA-Z0-9 ]{0,16}",
            id in 0u8..=127,
        ) {
            let dev = DeviceInfo::new(vendor, name, description, "h");
            for &cmd in MidiCommand::all() {
                let dk = device_key(&dev, cmd);
                let ck = control_key(&dev, cmd, id);
                prop_assert_eq!(&ck, &dk.extended(id.to_string()));
                prop_assert!(dk.is_prefix_of(&ck));
            }
        }
    }
}
