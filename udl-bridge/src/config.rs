//! Configuration for the bridge.

use std::path::Path;

use serde::{Deserialize, Serialize};
use udl_core::{DeviceConfig, ModeDescriptor};

use crate::pattern::Pattern;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Adapter options passed to attach.
    pub device: DeviceConfig,
    /// Display timing to program.
    pub mode: ModeDescriptor,
    /// UDP tunnel endpoints.
    pub network: NetworkConfig,
    /// What to send and how fast.
    pub stream: StreamConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// UDP tunnel endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address to bind.
    pub bind: String,
    /// Address of the host that owns the adapter.
    pub remote: String,
}

/// Frame pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Target frames per second.
    pub fps: u32,
    /// Pattern used when no frame file is given.
    pub pattern: Pattern,
    /// Stop after this many frames (0 = until Ctrl-C or end of file).
    pub frame_limit: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:0".into(),
            remote: "127.0.0.1:7340".into(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            pattern: Pattern::Gradient,
            frame_limit: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl BridgeConfig {
    /// Load configuration from a TOML file, falling back to defaults.
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

    /// Frame interval, with fps clamped to 1..=60.
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.stream.fps.clamp(1, 60) as f64)
    }
}

// ── Tests ────────────────────────────────────────────────────────
