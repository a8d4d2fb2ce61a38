//! Engine configuration
//!
//! Supplied once when the engine is spawned; nothing here is hot-reloaded. The
//! file format is TOML, every field has a default so a partial file (or no file
//! at all) still yields a usable configuration.

use crate::input::control::{Control, ControlMapping};
use crate::input::keyboard::{default_control_keys, default_virtual_gamepads, VirtualGamepadMap};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Upper bound for the poll interval and both cooldowns (one hour)
pub const MAX_INTERVAL_MS: u64 = 3_600_000;
/// Upper bound for the rect TTL and the sweep interval (one day)
pub const MAX_INTERVAL_SECS: u64 = 86_400;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct PadnavConfig {
    pub input: InputSettings,
    pub rect_cache: RectCacheSettings,
}

/// Settings of the input normalization layer
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct InputSettings {
    /// Interval between physical device polls while any device is connected
    pub poll_interval_ms: u64,
    /// Quiet window after a control goes down before the first repeat
    pub on_down_cooldown_ms: u64,
    /// Spacing between repeats while a control stays held
    pub on_held_cooldown_ms: u64,
    /// Turn an A press into an activation of the focused element
    pub translate_a_to_activate: bool,
    pub mapping: ControlMapping,
    /// Key each control is re-synthesized as
    pub control_keys: BTreeMap<Control, String>,
    /// Ordered keyboard-based virtual controllers
    pub virtual_gamepads: Vec<VirtualGamepadMap>,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            on_down_cooldown_ms: 200,
            on_held_cooldown_ms: 300,
            translate_a_to_activate: false,
            mapping: ControlMapping::default(),
            control_keys: default_control_keys(),
            virtual_gamepads: default_virtual_gamepads(),
        }
    }
}

impl InputSettings {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn on_down_cooldown(&self) -> Duration {
        Duration::milliseconds(self.on_down_cooldown_ms as i64)
    }

    pub fn on_held_cooldown(&self) -> Duration {
        Duration::milliseconds(self.on_held_cooldown_ms as i64)
    }
}

/// Settings of the geometry cache
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RectCacheSettings {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RectCacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            sweep_interval_secs: 10,
        }
    }
}

impl RectCacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

impl PadnavConfig {
    /// `<config_dir>/padnav/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("padnav").join("config.toml"))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PadnavConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&content)
    }

    /// Loads `path` (or the default location). A missing file is not an error.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    warn!("No config directory available, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        match tokio::fs::try_exists(&path).await {
            Ok(true) => Self::load(&path).await,
            Ok(false) => {
                info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let input = &self.input;
        if input.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".to_string()));
        }
        if self.rect_cache.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "rect_cache.sweep_interval_secs must be > 0".to_string(),
            ));
        }
        let millis = [
            ("poll_interval_ms", input.poll_interval_ms),
            ("on_down_cooldown_ms", input.on_down_cooldown_ms),
            ("on_held_cooldown_ms", input.on_held_cooldown_ms),
        ];
        if let Some((name, value)) = millis.iter().find(|(_, value)| *value > MAX_INTERVAL_MS) {
            return Err(ConfigError::Invalid(format!(
                "input.{} = {} exceeds {}",
                name, value, MAX_INTERVAL_MS
            )));
        }
        let secs = [
            ("ttl_secs", self.rect_cache.ttl_secs),
            ("sweep_interval_secs", self.rect_cache.sweep_interval_secs),
        ];
        if let Some((name, value)) = secs.iter().find(|(_, value)| *value > MAX_INTERVAL_SECS) {
            return Err(ConfigError::Invalid(format!(
                "rect_cache.{} = {} exceeds {}",
                name, value, MAX_INTERVAL_SECS
            )));
        }
        if let Some((control, _)) = input.mapping.buttons.iter().find(|(_, pins)| pins.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "control {:?} has an empty pin list",
                control
            )));
        }
        Ok(())
    }
}
