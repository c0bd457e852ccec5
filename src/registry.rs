//! Device registry and poller
//!
//! Tracks attached input devices and republishes their raw messages onto
//! the bus, tagged at every key granularity. A scan never removes entries;
//! device disappearance is only detected indirectly (a vanished port simply
//! stops producing).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::bus::{EventBus, MidiEvent};
use crate::device::DeviceInfo;
use crate::keys::{command_key, control_key, device_key};
use crate::midi::MidiMessage;
use crate::ports::{InputReceiver, MidiGateway};

/// Registry of attached devices, fed by [`scan_and_attach`]
///
/// [`scan_and_attach`]: DeviceRegistry::scan_and_attach
pub struct DeviceRegistry {
    gateway: Arc<dyn MidiGateway>,
    bus: Arc<EventBus>,
    /// Device-name fragments excluded from discovery (pseudo-devices)
    denylist: Vec<String>,
    /// Opaque handle -> held receiver; entries are never removed
    attached: Mutex<HashMap<String, Box<dyn InputReceiver>>>,
}

impl DeviceRegistry {
    pub fn new(gateway: Arc<dyn MidiGateway>, bus: Arc<EventBus>, denylist: Vec<String>) -> Self {
        Self {
            gateway,
            bus,
            denylist,
            attached: Mutex::new(HashMap::new()),
        }
    }

    /// One scan cycle: enumerate, diff against the registry, attach the new
    /// devices. Returns the number of devices attached this cycle.
    ///
    /// A device the gateway refuses to open is logged and skipped; the rest
    /// of the scan proceeds. An enumeration failure aborts only this cycle.
    pub fn scan_and_attach(&self) -> Result<usize> {
        let available = self.gateway.list_inputs()?;

        let candidates: Vec<DeviceInfo> = available
            .into_iter()
            .filter(|dev| !self.is_denylisted(&dev.name))
            .collect();

        let mut newly_attached = 0;
        for device in candidates {
            {
                let attached = self.attached.lock();
                if attached.contains_key(&device.handle) {
                    continue;
                }
            }

            match self.attach(&device) {
                Ok(receiver) => {
                    self.attached.lock().insert(device.handle.clone(), receiver);
                    info!(device = %device.name, "attached input device");
                    newly_attached += 1;
                }
                Err(e) => {
                    warn!(device = %device.name, "failed to open input: {e:#}");
                }
            }
        }

        Ok(newly_attached)
    }

    /// Periodic scan loop. One scan completes before the next is scheduled;
    /// a failed scan is a no-op for that tick.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.scan_and_attach() {
                Ok(0) => trace!("scan found no new devices"),
                Ok(n) => debug!(attached = n, "scan attached new devices"),
                Err(e) => warn!("device scan failed: {e:#}"),
            }
        }
    }

    /// Handles of currently attached devices
    pub fn attached_handles(&self) -> Vec<String> {
        self.attached.lock().keys().cloned().collect()
    }

    pub fn is_attached(&self, handle: &str) -> bool {
        self.attached.lock().contains_key(handle)
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }

    fn is_denylisted(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.denylist
            .iter()
            .any(|entry| name.contains(&entry.to_lowercase()))
    }

    fn attach(&self, device: &DeviceInfo) -> Result<Box<dyn InputReceiver>> {
        let bus = self.bus.clone();
        let device_for_cb = device.clone();

        self.gateway.open_receiver(
            device,
            Box::new(move |timestamp, data| {
                publish_raw(&bus, &device_for_cb, timestamp, data);
            }),
        )
    }
}

/// Parse raw bytes and publish the event at every key granularity
///
/// One publish step: command-level, device-level, then control-level for
/// messages carrying a primary id. The bus matches keys exactly, so each
/// subscriber sees the message once at its own granularity.
fn publish_raw(bus: &EventBus, device: &DeviceInfo, timestamp: u64, data: &[u8]) {
    let Some(message) = MidiMessage::parse(data) else {
        trace!(device = %device.name, "dropping unparseable message");
        return;
    };

    let command = message.command();
    let event = Arc::new(MidiEvent {
        device: device.clone(),
        message,
        timestamp_us: Some(timestamp),
    });

    bus.publish(&command_key(command), event.clone());
    bus.publish(&device_key(device, command), event.clone());
    if let Some(id) = event.message.primary_id() {
        bus.publish(&control_key(device, command, id), event);
    }
}


#[cfg(test)]
mod tests {
    use super::test_gateway::TestGateway;
    use super::*;
    use crate::bus::SubscriptionId;
    use crate::midi::MidiCommand;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn korg() -> DeviceInfo {
        DeviceInfo::new("Korg", "nanoKONTROL2", "SLIDER/KNOB", "korg-1")
    }

    fn akai() -> DeviceInfo {
        DeviceInfo::new("Akai", "MPK Mini", "pads and keys", "akai-1")
    }

    fn counter_sub(
        bus: &EventBus,
        key: crate::keys::EventKey,
        role: &str,
    ) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in = hits.clone();
        bus.subscribe_ordered(
            key,
            Arc::new(move |_| {
                hits_in.fetch_add(1, Ordering::SeqCst);
            }),
            SubscriptionId::new("test", role),
        );
        hits
    }

    #[tokio::test]
    async fn test_denylisted_device_never_attaches() {
        let gateway = TestGateway::new();
        gateway.add_device(DeviceInfo::new("", "Midi Through Port-0", "", "thru-0"));
        gateway.add_device(korg());

        let bus = Arc::new(EventBus::new());
        let registry = DeviceRegistry::new(
            gateway.clone(),
            bus,
            vec!["midi through".to_string()],
        );

        // Repeated scans: the pseudo-device stays out every time.
        assert_eq!(registry.scan_and_attach().unwrap(), 1);
        assert_eq!(registry.scan_and_attach().unwrap(), 0);
        assert!(registry.is_attached("korg-1"));
        assert!(!registry.is_attached("thru-0"));
        assert_eq!(registry.attached_count(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_skips_device_but_scan_continues() {
        let gateway = TestGateway::new();
        gateway.add_device(korg());
        gateway.add_device(akai());
        gateway.refuse("korg-1");

        let bus = Arc::new(EventBus::new());
        let registry = DeviceRegistry::new(gateway.clone(), bus, Vec::new());

        assert_eq!(registry.scan_and_attach().unwrap(), 1);
        assert!(!registry.is_attached("korg-1"));
        assert!(registry.is_attached("akai-1"));
    }

    #[tokio::test]
    async fn test_rescans_do_not_reattach() {
        let gateway = TestGateway::new();
        gateway.add_device(korg());

        let bus = Arc::new(EventBus::new());
        let registry = DeviceRegistry::new(gateway.clone(), bus.clone(), Vec::new());

        let hits = counter_sub(&bus, command_key(MidiCommand::ControlChange), "cc");

        registry.scan_and_attach().unwrap();
        registry.scan_and_attach().unwrap();
        registry.scan_and_attach().unwrap();

        // One attached receiver, so one delivery per emitted message.
        gateway.emit("korg-1", &[0xB0, 5, 64]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_granularity_routing() {
        let gateway = TestGateway::new();
        gateway.add_device(korg());
        gateway.add_device(akai());

        let bus = Arc::new(EventBus::new());
        let registry = DeviceRegistry::new(gateway.clone(), bus.clone(), Vec::new());
        registry.scan_and_attach().unwrap();

        let cmd = MidiCommand::ControlChange;
        let any_cc = counter_sub(&bus, command_key(cmd), "any-cc");
        let korg_cc = counter_sub(&bus, device_key(&korg(), cmd), "korg-cc");
        let korg_cc5 = counter_sub(&bus, control_key(&korg(), cmd, 5), "korg-cc5");

        gateway.emit("korg-1", &[0xB0, 5, 10]); // korg cc 5
        gateway.emit("korg-1", &[0xB0, 7, 20]); // korg cc 7
        gateway.emit("akai-1", &[0xB0, 5, 30]); // akai cc 5

        // Command level sees every CC from every device.
        assert_eq!(any_cc.load(Ordering::SeqCst), 3);
        // Device level sees only its own device.
        assert_eq!(korg_cc.load(Ordering::SeqCst), 2);
        // Control level sees only that control on that device.
        assert_eq!(korg_cc5.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_velocity_zero_note_on_routes_as_note_off() {
        let gateway = TestGateway::new();
        gateway.add_device(korg());

        let bus = Arc::new(EventBus::new());
        let registry = DeviceRegistry::new(gateway.clone(), bus.clone(), Vec::new());
        registry.scan_and_attach().unwrap();

        let ons = counter_sub(&bus, command_key(MidiCommand::NoteOn), "ons");
        let offs = counter_sub(&bus, command_key(MidiCommand::NoteOff), "offs");

        gateway.emit("korg-1", &[0x90, 60, 0]);
        assert_eq!(ons.load(Ordering::SeqCst), 0);
        assert_eq!(offs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hotplug_between_scans() {
        let gateway = TestGateway::new();
        gateway.add_device(korg());

        let bus = Arc::new(EventBus::new());
        let registry = DeviceRegistry::new(gateway.clone(), bus, Vec::new());

        assert_eq!(registry.scan_and_attach().unwrap(), 1);

        gateway.add_device(akai());
        assert_eq!(registry.scan_and_attach().unwrap(), 1);
        assert_eq!(registry.attached_count(), 2);
    }
}
