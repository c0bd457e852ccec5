//! Input device identity
//!
//! A `DeviceInfo` describes one discoverable MIDI input. Identity (equality,
//! hashing, registry dedup) is by the opaque handle only; the descriptive
//! fields exist for event keys and display.

use std::fmt;

/// Identity of a discovered MIDI input device
///
/// Immutable once discovered. Backends that cannot report a vendor or
/// description (midir only exposes the port name) leave those fields empty;
/// empty atoms are still valid in event keys.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub vendor: String,
    pub name: String,
    pub description: String,
    /// Opaque backend handle, stable for the life of the port
    pub handle: String,
}

impl DeviceInfo {
    pub fn new(
        vendor: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        handle: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            name: name.into(),
            description: description.into(),
            handle: handle.into(),
        }
    }
}

// Equality and dedup are by opaque handle only.
impl PartialEq for DeviceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for DeviceInfo {}

impl std::hash::Hash for DeviceInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.vendor.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} {}", self.vendor, self.name)
        }
    }
}
