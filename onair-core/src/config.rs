use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for a station client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

/// Change channel connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Base delay for reconnect backoff in milliseconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    /// Cap on a single backoff delay in milliseconds.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
    /// Connection attempts before giving up on push delivery.
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    /// Fallback polling cadence in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

const fn default_backoff_base() -> u64 {
    500
}

const fn default_backoff_cap() -> u64 {
    30_000
}

const fn default_max_connect_attempts() -> u32 {
    5
}

const fn default_poll_interval() -> u64 {
    5000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
            max_connect_attempts: default_max_connect_attempts(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Playback synchronizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Periodic resync cadence in milliseconds while a broadcast is active.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_ms: u64,
    /// Hard-seek only when drift exceeds this many seconds; anything
    /// smaller would cause audible glitching from constant micro-seeks.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold_secs: f64,
    /// Propagate a duration correction when the measured duration differs
    /// from the stored nominal one by more than this many seconds.
    #[serde(default = "default_duration_correction_threshold")]
    pub duration_correction_threshold_secs: f64,
}

const fn default_resync_interval() -> u64 {
    5000
}

const fn default_drift_threshold() -> f64 {
    2.0
}

const fn default_duration_correction_threshold() -> f64 {
    1.0
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            resync_interval_ms: default_resync_interval(),
            drift_threshold_secs: default_drift_threshold(),
            duration_correction_threshold_secs: default_duration_correction_threshold(),
        }
    }
}

impl PlayerConfig {
    #[must_use]
    pub const fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }
}

/// Scheduler reconciler settings (admin clients only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Coarse timer cadence in milliseconds; each tick re-derives the full
    /// target state so redundant ticks are harmless.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

const fn default_tick_interval() -> u64 {
    15_000
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl ReconcilerConfig {
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl StationConfig {
    /// Get the config file path (~/.config/onair/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from the default path or create a template on first run.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigNotFound`] after writing the template, or
    /// parse/IO errors for an unreadable file.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&Self::config_path())
    }

    /// Same as [`load_or_create`](Self::load_or_create) against an explicit
    /// path.
    ///
    /// # Errors
    ///
    /// See [`load_or_create`](Self::load_or_create).
    pub fn load_or_create_at(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(config_path, CONFIG_TEMPLATE)?;
            return Err(CoreError::ConfigNotFound {
                path: config_path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

const CONFIG_TEMPLATE: &str = r#"# ONAIR Configuration
# ~/.config/onair/config.toml
# All fields are optional; the values below are the defaults.

[channel]
# Reconnect backoff: delay = min(backoff_base_ms * 2^attempt, backoff_cap_ms)
backoff_base_ms = 500
backoff_cap_ms = 30000
# Connection attempts before falling back to polling
max_connect_attempts = 5
# Fallback polling cadence
poll_interval_ms = 5000

[player]
# Resync cadence while a broadcast is active
resync_interval_ms = 5000
# Hard-seek only when drift exceeds this
drift_threshold_secs = 2.0
# Report measured durations differing from the stored ones by more than this
duration_correction_threshold_secs = 1.0

[reconciler]
# Schedule reconciliation cadence (admin clients)
tick_interval_ms = 15000
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StationConfig::default();
        assert_eq!(config.channel.backoff_base_ms, 500);
        assert_eq!(config.channel.max_connect_attempts, 5);
        assert_eq!(config.channel.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.player.resync_interval(), Duration::from_secs(5));
        assert!((config.player.drift_threshold_secs - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.reconciler.tick_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_empty_file_parses_to_defaults() {
        let Ok(config) = toml::from_str::<StationConfig>("") else {
            panic!("empty config parses");
        };
        assert_eq!(config.channel.poll_interval_ms, 5000);
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let Ok(config) = toml::from_str::<StationConfig>(CONFIG_TEMPLATE) else {
            panic!("template parses");
        };
        assert_eq!(config.channel.backoff_cap_ms, 30_000);
        assert!((config.player.duration_correction_threshold_secs - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_override() {
        let Ok(config) = toml::from_str::<StationConfig>("[channel]\nmax_connect_attempts = 2\n")
        else {
            panic!("partial config parses");
        };
        assert_eq!(config.channel.max_connect_attempts, 2);
        assert_eq!(config.channel.backoff_base_ms, 500);
    }
}
