//! MIDI message types and parsing
//!
//! Provides parsing and encoding of MIDI channel messages, plus the
//! command/primary-id accessors the routing layer keys events by.

use std::fmt;

/// MIDI channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Polyphonic Key Pressure: channel (0-15), note (0-127), pressure (0-127)
    PolyPressure { channel: u8, note: u8, pressure: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure: channel (0-15), pressure (0-127)
    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },
}

/// Message category, used as the command atom in event keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiCommand {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
}

impl MidiCommand {
    /// Stable lowercase name used in event key atoms
    pub fn as_str(&self) -> &'static str {
        match self {
            MidiCommand::NoteOff => "note_off",
            MidiCommand::NoteOn => "note_on",
            MidiCommand::PolyPressure => "poly_pressure",
            MidiCommand::ControlChange => "control_change",
            MidiCommand::ProgramChange => "program_change",
            MidiCommand::ChannelPressure => "channel_pressure",
            MidiCommand::PitchBend => "pitch_bend",
        }
    }

    /// All commands, for subscribing to every message category
    pub fn all() -> &'static [MidiCommand] {
        &[
            MidiCommand::NoteOff,
            MidiCommand::NoteOn,
            MidiCommand::PolyPressure,
            MidiCommand::ControlChange,
            MidiCommand::ProgramChange,
            MidiCommand::ChannelPressure,
            MidiCommand::PitchBend,
        ]
    }
}

impl fmt::Display for MidiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MidiMessage {
    /// Parse a MIDI channel message from raw bytes
    ///
    /// System messages (0xF0-0xFF) and running status are not handled; they
    /// return None and the caller drops them.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }

        let status = data[0];
        if status < 0x80 || status >= 0xF0 {
            return None;
        }

        let message_type = status & 0xF0;
        let channel = status & 0x0F;

        match message_type {
            0x80 => {
                // Note Off
                if data.len() < 3 {
                    return None;
                }
                Some(MidiMessage::NoteOff {
                    channel,
                    note: data[1] & 0x7F,
                    velocity: data[2] & 0x7F,
                })
            }
            0x90 => {
                // Note On (velocity 0 = Note Off)
                if data.len() < 3 {
                    return None;
                }
                let note = data[1] & 0x7F;
                let velocity = data[2] & 0x7F;

                if velocity == 0 {
                    Some(MidiMessage::NoteOff { channel, note, velocity: 0 })
                } else {
                    Some(MidiMessage::NoteOn { channel, note, velocity })
                }
            }
            0xA0 => {
                // Polyphonic Key Pressure
                if data.len() < 3 {
                    return None;
                }
                Some(MidiMessage::PolyPressure {
                    channel,
                    note: data[1] & 0x7F,
                    pressure: data[2] & 0x7F,
                })
            }
            0xB0 => {
                // Control Change
                if data.len() < 3 {
                    return None;
                }
                Some(MidiMessage::ControlChange {
                    channel,
                    cc: data[1] & 0x7F,
                    value: data[2] & 0x7F,
                })
            }
            0xC0 => {
                // Program Change
                if data.len() < 2 {
                    return None;
                }
                Some(MidiMessage::ProgramChange {
                    channel,
                    program: data[1] & 0x7F,
                })
            }
            0xD0 => {
                // Channel Pressure
                if data.len() < 2 {
                    return None;
                }
                Some(MidiMessage::ChannelPressure {
                    channel,
                    pressure: data[1] & 0x7F,
                })
            }
            0xE0 => {
                // Pitch Bend
                if data.len() < 3 {
                    return None;
                }
                let lsb = (data[1] & 0x7F) as u16;
                let msb = (data[2] & 0x7F) as u16;
                let value = (msb << 7) | lsb;
                Some(MidiMessage::PitchBend { channel, value })
            }
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                vec![0xA0 | (channel & 0x0F), note & 0x7F, pressure & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
        }
    }

    /// The command category of this message
    pub fn command(&self) -> MidiCommand {
        match self {
            MidiMessage::NoteOff { .. } => MidiCommand::NoteOff,
            MidiMessage::NoteOn { .. } => MidiCommand::NoteOn,
            MidiMessage::PolyPressure { .. } => MidiCommand::PolyPressure,
            MidiMessage::ControlChange { .. } => MidiCommand::ControlChange,
            MidiMessage::ProgramChange { .. } => MidiCommand::ProgramChange,
            MidiMessage::ChannelPressure { .. } => MidiCommand::ChannelPressure,
            MidiMessage::PitchBend { .. } => MidiCommand::PitchBend,
        }
    }

    /// Primary identifier: note number for note messages, controller number
    /// for control changes. None for messages without a per-control address.
    pub fn primary_id(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { note, .. }
            | MidiMessage::NoteOn { note, .. }
            | MidiMessage::PolyPressure { note, .. } => Some(note),
            MidiMessage::ControlChange { cc, .. } => Some(cc),
            _ => None,
        }
    }

    /// Data value: velocity, CC value, pressure, or program (all 0-127)
    pub fn value(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { velocity, .. } | MidiMessage::NoteOn { velocity, .. } => {
                Some(velocity)
            }
            MidiMessage::PolyPressure { pressure, .. }
            | MidiMessage::ChannelPressure { pressure, .. } => Some(pressure),
            MidiMessage::ControlChange { value, .. } => Some(value),
            MidiMessage::ProgramChange { program, .. } => Some(program),
            MidiMessage::PitchBend { .. } => None,
        }
    }

    /// Get the channel (0-15)
    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                write!(f, "PolyPressure ch:{} n:{} p:{}", channel + 1, note, pressure)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "ChannelPressure ch:{} p:{}", channel + 1, pressure)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
        }
    }
}

/// MIDI value conversion utilities
pub mod convert {
    /// Convert 7-bit value (0-127) to the unit interval (0.0-1.0)
    pub fn to_unit(value: u8) -> f64 {
        (value & 0x7F) as f64 / 127.0
    }

    /// Convert 7-bit value to percentage (0-100)
    pub fn to_percent_7bit(value: u8) -> f32 {
        (value as f32 * 100.0) / 127.0
    }

    /// Convert percentage to 7-bit value
    pub fn from_percent_7bit(percent: f32) -> u8 {
        ((percent.clamp(0.0, 100.0) * 127.0) / 100.0) as u8
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
