//! Configuration module for taprec
//!
//! All settings live in one [`AppConfig`] that can be stored as TOML (`.toml`)
//! or JSON (`.json`). Every section and field has a default, so partial files
//! are accepted.
//!
//! # Config Location
//!
//! The default file is in the platform-appropriate config directory:
//! - **Linux**: `~/.config/taprec/config.toml`
//! - **macOS**: `~/Library/Application Support/taprec/config.toml`
//! - **Windows**: `%APPDATA%\taprec\config.toml`
//!
//! # Example
//!
//! ```toml
//! [detection]
//! label = "vehicle"
//! hysteresis_ms = 1000
//!
//! [branch]
//! encoder = "x264enc"
//! output_dir = "/var/recordings"
//!
//! [lifecycle]
//! attach_policy = "queue"
//! ```

use crate::engine::sim::SourceScript;
use crate::error::{Result, TapRecError};
use crate::recording::{AttachPolicy, BranchTemplate};
use crate::session::SequenceStep;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "taprec";

/// Default config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default hysteresis in milliseconds
pub const DEFAULT_HYSTERESIS_MS: u64 = 1000;

/// Default control loop wake-up interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

// ==================== Config Directory ====================

/// Get the application config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Sections ====================

/// What the presence sampler looks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Region label that counts as "present"
    pub label: String,

    /// Minimum time between opposite edges
    pub hysteresis_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            label: "vehicle".to_string(),
            hysteresis_ms: DEFAULT_HYSTERESIS_MS,
        }
    }
}

impl DetectionConfig {
    pub fn hysteresis(&self) -> Duration {
        Duration::from_millis(self.hysteresis_ms)
    }
}

/// Branch construction and output naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchConfig {
    #[serde(flatten)]
    pub template: BranchTemplate,

    /// Directory that recordings are written to
    pub output_dir: PathBuf,

    pub file_prefix: String,

    pub file_extension: String,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            template: BranchTemplate::default(),
            output_dir: PathBuf::from("."),
            file_prefix: "video_out".to_string(),
            file_extension: "mp4".to_string(),
        }
    }
}

impl BranchConfig {
    /// `{output_dir}/{prefix}.{HHMMSS}.{ext}` for the given local time.
    pub fn file_name_at(&self, time: DateTime<Local>) -> PathBuf {
        self.output_dir.join(format!(
            "{}.{}.{}",
            self.file_prefix,
            time.format("%H%M%S"),
            self.file_extension
        ))
    }

    /// Destination for a recording starting now.
    pub fn next_destination(&self) -> PathBuf {
        self.file_name_at(Local::now())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// What to do with an attach while a detach is still in flight
    pub attach_policy: AttachPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// How often the control loop wakes up when idle
    pub poll_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ControlConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    pub filter: String,

    /// Also write a daily-rotated log file here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,taprec=debug".to_string(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Write DOT topology snapshots around every attach and removal
    pub dot_dir: Option<PathBuf>,
}

/// Demo source and optional timed attach/detach sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub script: SourceScript,

    /// When non-empty, recordings follow this timetable instead of detections
    pub sequence: Vec<SequenceStep>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            script: SourceScript {
                frame_count: Some(300),
                detections: vec![
                    crate::engine::sim::DetectionWindow::new("vehicle", 1_000, 3_000),
                    crate::engine::sim::DetectionWindow::new("vehicle", 3_400, 6_000),
                    crate::engine::sim::DetectionWindow::new("vehicle", 9_000, 11_000),
                ],
                ..Default::default()
            },
            sequence: Vec::new(),
        }
    }
}

// ==================== App Config ====================

/// Complete taprec configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub branch: BranchConfig,
    pub lifecycle: LifecycleConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
    pub debug: DebugConfig,
    pub source: SourceConfig,
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

impl AppConfig {
    /// Load a config file; the format follows the extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TapRecError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        if is_json(path) {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    /// Load the config at `path`, or the default location, falling back to
    /// defaults when nothing usable is found
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) if p.exists() => p,
                _ => return Self::default(),
            },
        };
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config {:?}, using defaults: {}", path, e);
            Self::default()
        })
    }

    /// Save to `path`; the format follows the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TapRecError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };

        std::fs::write(path, content).map_err(|e| {
            TapRecError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

// ==================== Tests ====================
