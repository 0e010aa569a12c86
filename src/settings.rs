//! Persisted driver configuration.
//!
//! Settings travel through an explicit channel: a TOML file owned by the
//! driver plus the typed [`crate::control::api`] used by `relayctl`.

use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{DEFAULT_OUTPUT_BUFFER_FRAMES, MIN_OUTPUT_BUFFER_FRAMES};

/// Driver configuration persisted between sessions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// UID of the physical output device audio is relayed to. `None`
    /// resolves to the OS default at bind time.
    pub output_device_uid: Option<String>,
    /// IO buffer size requested from the physical output device, in frames.
    pub output_buffer_frames: u32,
    /// Display name the virtual device registers under.
    pub device_name: String,
    /// Whether the host has acquired the containing box.
    pub box_acquired: bool,
    /// Whether volume and mute controls are advertised and applied.
    pub expose_controls: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            output_device_uid: None,
            output_buffer_frames: DEFAULT_OUTPUT_BUFFER_FRAMES,
            device_name: "Relay Audio Device".to_string(),
            box_acquired: false,
            expose_controls: true,
        }
    }
}

impl DriverSettings {
    fn clamped(mut self) -> Self {
        self.output_buffer_frames = self.output_buffer_frames.max(MIN_OUTPUT_BUFFER_FRAMES);
        self
    }
}

/// Store wrapping the current settings with best-effort persistence.
///
/// Updates are applied in memory first and written back to disk when a
/// path is configured; a failed write is logged and otherwise ignored.
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<DriverSettings>,
}

impl SettingsStore {
    /// In-memory store that never touches the filesystem.
    pub fn in_memory(settings: DriverSettings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings.clamped()),
        }
    }

    /// Load settings from `path`, falling back to defaults when the file
    /// is absent or malformed.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<DriverSettings>(&text) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!(path = %path.display(), %err, "malformed settings file, using defaults");
                    DriverSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => DriverSettings::default(),
            Err(err) => {
                warn!(path = %path.display(), %err, "could not read settings file, using defaults");
                DriverSettings::default()
            }
        };
        Self {
            path: Some(path),
            current: RwLock::new(settings.clamped()),
        }
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> DriverSettings {
        self.current.read().clone()
    }

    /// Apply `change` and persist the result.
    pub fn update(&self, change: impl FnOnce(&mut DriverSettings)) -> DriverSettings {
        let updated = {
            let mut current = self.current.write();
            change(&mut current);
            *current = current.clone().clamped();
            current.clone()
        };
        self.persist(&updated);
        updated
    }

    fn persist(&self, settings: &DriverSettings) {
        let Some(path) = &self.path else {
            return;
        };
        match toml::to_string_pretty(settings) {
            Ok(text) => {
                if let Err(err) = fs::write(path, text) {
                    warn!(path = %path.display(), %err, "failed to persist settings");
                } else {
                    debug!(path = %path.display(), "settings persisted");
                }
            }
            Err(err) => warn!(%err, "failed to serialize settings"),
        }
    }
}
