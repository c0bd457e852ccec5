//! CLI bus monitor
//!
//! Prints live traffic from the bus. Uses concurrent delivery on purpose:
//! a display consumer tolerates reordering, and the pool path keeps the
//! device producer threads from blocking on terminal I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use colored::*;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bus::{EventBus, MidiEvent, SubscriptionId};
use crate::keys::command_key;
use crate::midi::{format_hex, MidiCommand, MidiMessage};

/// One monitored event, as emitted in `--json` mode
#[derive(Debug, Serialize)]
pub struct MonitorRecord {
    pub elapsed_ms: u64,
    pub device: String,
    pub command: &'static str,
    pub id: Option<u8>,
    pub value: Option<u8>,
    pub hex: String,
}

impl MonitorRecord {
    pub fn from_event(elapsed_ms: u64, event: &MidiEvent) -> Self {
        Self {
            elapsed_ms,
            device: event.device.to_string(),
            command: event.message.command().as_str(),
            id: event.message.primary_id(),
            value: event.message.value(),
            hex: format_hex(&event.message.encode()),
        }
    }
}

/// Run the monitor until Ctrl+C
pub async fn run_monitor(bus: Arc<EventBus>, json: bool) -> Result<()> {
    if !json {
        println!("{}", "=== MIDI Monitor ===".bold().cyan());
        println!("Press Ctrl+C to exit\n");
        println!("{}", "Format: [timestamp] DEVICE | HEX => PARSED".dimmed());
        println!("{}\n", "─".repeat(72).dimmed());
    }

    let (event_tx, mut event_rx) = mpsc::channel::<Arc<MidiEvent>>(1000);

    // One concurrent subscription per command key covers all traffic.
    let mut ids = Vec::new();
    for &cmd in MidiCommand::all() {
        let id = SubscriptionId::new("monitor", cmd.as_str());
        let tx = event_tx.clone();
        bus.subscribe_concurrent(
            command_key(cmd),
            Arc::new(move |event| {
                // Display is best-effort: drop events when the terminal
                // cannot keep up.
                let _ = tx.try_send(event);
            }),
            id.clone(),
        );
        ids.push(id);
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            running.store(false, Ordering::Relaxed);
        });
    }

    let start = Instant::now();
    while running.load(Ordering::Relaxed) {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                if json {
                    let record = MonitorRecord::from_event(elapsed_ms, &event);
                    println!("{}", serde_json::to_string(&record)?);
                } else {
                    print_event(elapsed_ms, &event);
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    for id in &ids {
        bus.unsubscribe(id);
    }
    debug!("monitor unsubscribed");

    if !json {
        println!("\n{}", "Monitor stopped".yellow());
    }
    Ok(())
}

/// Truncate to 20 display characters; port names are not always ASCII
fn truncate_name(name: String) -> String {
    if name.chars().count() > 20 {
        let head: String = name.chars().take(17).collect();
        format!("{head}...")
    } else {
        name
    }
}

fn print_event(elapsed_ms: u64, event: &MidiEvent) {
    let device = truncate_name(event.device.to_string());

    let hex = format_hex(&event.message.encode());
    let hex_colored = match event.message {
        MidiMessage::NoteOn { .. } => hex.bright_green(),
        MidiMessage::NoteOff { .. } => hex.bright_red(),
        MidiMessage::ControlChange { .. } => hex.bright_yellow(),
        MidiMessage::PitchBend { .. } => hex.bright_cyan(),
        _ => hex.normal(),
    };

    println!(
        "[{}ms] {:20} | {} => {}",
        format!("{:08}", elapsed_ms).dimmed(),
        device.white(),
        hex_colored,
        event.message.to_string().bright_blue()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInfo;

    #[test]
    fn test_record_serialization() {
        let event = MidiEvent {
            device: DeviceInfo::new("Korg", "nanoKONTROL2", "", "k1"),
            message: MidiMessage::ControlChange { channel: 0, cc: 7, value: 100 },
            timestamp_us: Some(1234),
        };

        let record = MonitorRecord::from_event(42, &event);
        let json = serde_json::to_string(&record).unwrap();

        assert!(json.contains("\"command\":\"control_change\""));
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"value\":100"));
        assert!(json.contains("\"elapsed_ms\":42"));
    }

    #[test]
    fn test_truncation_handles_multibyte_names() {
        let long = "Clavier Maître Numérique à 61 touches".to_string();
        let truncated = truncate_name(long);
        assert_eq!(truncated.chars().count(), 20);
        assert!(truncated.ends_with("..."));

        let short = "Keyboard Maître".to_string();
        assert_eq!(truncate_name(short.clone()), short);
    }

    #[test]
    fn test_record_for_pitch_bend_has_no_id() {
        let event = MidiEvent {
            device: DeviceInfo::new("", "Keystation", "", "m1"),
            message: MidiMessage::PitchBend { channel: 0, value: 8192 },
            timestamp_us: None,
        };

        let record = MonitorRecord::from_event(0, &event);
        assert_eq!(record.id, None);
        assert_eq!(record.value, None);
        assert_eq!(record.command, "pitch_bend");
    }
}
