//! MIDI input gateway
//!
//! Defines the device-discovery collaborator contract the registry is built
//! against, and the production implementation over midir. Tests substitute
//! their own gateway to drive synthetic traffic.

use anyhow::{bail, Context, Result};
use colored::*;
use midir::{MidiInput, MidiInputConnection};
use tracing::debug;

use crate::device::DeviceInfo;

/// Raw message callback: backend timestamp (microseconds) plus raw bytes
pub type RawMessageCallback = Box<dyn FnMut(u64, &[u8]) + Send + 'static>;

/// Device-discovery collaborator: enumerates inputs and opens receivers
pub trait MidiGateway: Send + Sync {
    /// Currently available input devices
    fn list_inputs(&self) -> Result<Vec<DeviceInfo>>;

    /// Open an input receiver on a device. The callback runs on the
    /// backend's own producer thread, one thread per open device.
    /// Dropping the returned receiver closes the connection.
    fn open_receiver(
        &self,
        device: &DeviceInfo,
        on_message: RawMessageCallback,
    ) -> Result<Box<dyn InputReceiver>>;
}

/// Held input connection; dropping it disconnects
pub trait InputReceiver: Send {}

/// Production gateway over midir
///
/// midir exposes only a port name, so `vendor` and `description` stay
/// empty in the device records it produces and the port name doubles as
/// the opaque handle.
pub struct MidirGateway {
    client_name: String,
}

impl MidirGateway {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl MidiGateway for MidirGateway {
    fn list_inputs(&self) -> Result<Vec<DeviceInfo>> {
        let midi_in = MidiInput::new(&self.client_name).context("Failed to create MIDI client")?;

        let mut devices = Vec::new();
        for port in midi_in.ports() {
            if let Ok(name) = midi_in.port_name(&port) {
                devices.push(DeviceInfo::new("", name.clone(), "", name));
            }
        }

        Ok(devices)
    }

    fn open_receiver(
        &self,
        device: &DeviceInfo,
        mut on_message: RawMessageCallback,
    ) -> Result<Box<dyn InputReceiver>> {
        let midi_in = MidiInput::new(&format!("{}-rx", self.client_name))
            .context("Failed to create MIDI client")?;

        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| {
                midi_in
                    .port_name(p)
                    .map(|name| name == device.handle)
                    .unwrap_or(false)
            })
            .with_context(|| format!("Port no longer available: {}", device.name))?;

        debug!(device = %device.name, "opening input receiver");

        let conn = midi_in
            .connect(
                &port,
                &device.name,
                move |timestamp, data, _| {
                    on_message(timestamp, data);
                },
                (),
            )
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", device.name, e))?;

        Ok(Box::new(MidirReceiver { _conn: conn }))
    }
}

struct MidirReceiver {
    _conn: MidiInputConnection<()>,
}

impl InputReceiver for MidirReceiver {}

/// Print available input ports, marking denylisted pseudo-devices
pub fn print_ports(denylist: &[String]) -> Result<()> {
    let gateway = MidirGateway::new("midi-router-scanner");
    let devices = gateway.list_inputs()?;

    println!("\n{}", "=== Available MIDI Inputs ===".bold().cyan());

    if devices.is_empty() {
        bail!("No MIDI input ports found");
    }

    for dev in devices {
        let excluded = denylist
            .iter()
            .any(|d| dev.name.to_lowercase().contains(&d.to_lowercase()));
        let marker = if excluded {
            "[EXCLUDED]".yellow()
        } else {
            "[INPUT]   ".green()
        };
        println!("  {} {}", marker, dev.name);
    }

    println!();
    Ok(())
}
