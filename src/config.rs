//! Configuration management
//!
//! YAML configuration with serde defaults; every field is optional so an
//! absent file means the built-in defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

/// Default device-rescan period in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Pseudo-devices that look like inputs but are not physical controllers
static BUILTIN_DENYLIST: Lazy<Vec<String>> = Lazy::new(|| {
    vec![
        "Midi Through".to_string(),
        "Microsoft GS Wavetable Synth".to_string(),
        "FluidSynth".to_string(),
        "VirMIDI".to_string(),
    ]
});

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
}

/// MIDI discovery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Device-name fragments excluded from discovery (case-insensitive
    /// substring match)
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,

    /// Rescan period when periodic polling is enabled
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Periodic rescanning is off by default; one scan runs at startup
    #[serde(default)]
    pub poll_enabled: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_enabled: false,
        }
    }
}

fn default_denylist() -> Vec<String> {
    BUILTIN_DENYLIST.clone()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            info!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.midi.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.midi.poll_interval_ms, 2000);
        assert!(!config.midi.poll_enabled);
        assert!(config
            .midi
            .denylist
            .iter()
            .any(|d| d.contains("Midi Through")));
    }

    #[tokio::test]
    async fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "midi:\n  denylist: [\"IAC Driver\"]\n  poll_interval_ms: 500\n  poll_enabled: true"
        )
        .unwrap();

        let config = AppConfig::load(file.path()).await.unwrap();
        assert_eq!(config.midi.denylist, vec!["IAC Driver".to_string()]);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert!(config.midi.poll_enabled);
    }

    #[tokio::test]
    async fn test_partial_yaml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "midi:\n  poll_enabled: true").unwrap();

        let config = AppConfig::load(file.path()).await.unwrap();
        assert!(config.midi.poll_enabled);
        assert_eq!(config.midi.poll_interval_ms, 2000);
        assert!(!config.midi.denylist.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_or_default("/nonexistent/config.yaml")
            .await
            .unwrap();
        assert!(!config.midi.poll_enabled);
    }
}
