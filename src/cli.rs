//! Interactive learn REPL
//!
//! Press Enter, move a control on any attached device, and the next
//! control-change is captured and described with its derived keys. This is
//! the interactive binding workflow the one-shot capture exists for.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colored::*;
use rustyline::DefaultEditor;

use crate::capture::{CaptureError, ControlValueCache};
use crate::keys::control_key;
use crate::midi::{convert, MidiCommand};

const CAPTURE_WINDOW: Duration = Duration::from_secs(10);

pub async fn run_learn_repl(cache: Arc<ControlValueCache>) -> Result<()> {
    println!("{}", "=== Control Learn ===".bold().cyan());
    println!("Press Enter, then move a control. Type 'exit' to quit.\n");

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("learn> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line == "exit" || line == "quit" {
                    break;
                }

                println!("{}", "waiting for a control change...".dimmed());
                match cache.capture_next_timeout(CAPTURE_WINDOW).await {
                    Ok(capture) => {
                        let key = control_key(
                            capture.device(),
                            MidiCommand::ControlChange,
                            capture.controller,
                        );
                        println!(
                            "  {} cc={} value={} ({:.0}%)",
                            capture.device().to_string().bright_white(),
                            capture.controller.to_string().bright_yellow(),
                            capture.value,
                            convert::to_percent_7bit(capture.value),
                        );
                        println!("  key: {}\n", key.to_string().bright_blue());
                    }
                    Err(CaptureError::Timeout(_)) => {
                        println!("{}\n", "nothing moved, try again".yellow());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(_) => break,
        }
    }

    Ok(())
}
