//! Viewer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use glimpse_core::AgentConfig;

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Device connection settings.
    pub device: DeviceConfig,
    /// Device agent tuning.
    pub agent: AgentSettings,
    /// Floating mirror window.
    pub window: WindowConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Device connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device serial. Empty picks the only connected device.
    pub serial: String,
    /// Path to the adb binary.
    pub adb_path: String,
    /// Directory holding the agent artifact. Empty means the current
    /// working directory.
    pub payload_dir: String,
    /// Local TCP port forwarded to the device agent.
    pub forward_port: u16,
}

/// Device agent tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Long-edge cap for the encoded video, in device pixels.
    pub max_size: u32,
    /// Target video bit rate in bits per second.
    pub video_bit_rate: u32,
}

/// Floating mirror window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Long-edge cap for the window, in screen pixels.
    pub max_edge: u32,
    /// Initial window position.
    pub initial_x: f64,
    pub initial_y: f64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            agent: AgentSettings::default(),
            window: WindowConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: String::new(),
            adb_path: "adb".into(),
            payload_dir: String::new(),
            forward_port: 27183,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        let agent = AgentConfig::default();
        Self {
            max_size: agent.max_size,
            video_bit_rate: agent.video_bit_rate,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_edge: 760,
            initial_x: 100.0,
            initial_y: 100.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ViewerConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// The agent start configuration derived from this file.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::default()
            .with_max_size(self.agent.max_size)
            .with_bit_rate(self.agent.video_bit_rate)
    }
}

// ── Tests ────────────────────────────────────────────────────────
