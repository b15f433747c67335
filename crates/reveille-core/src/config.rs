use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ReveilleError, Result};
use crate::types::{DeviceFamily, DeviceRef, EntityRef, MediaRef};

/// Top-level configuration for Reveille.
///
/// Loaded from `~/.reveille/config.toml` by default. Every section falls
/// back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReveilleConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub snooze: SnoozeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub activation: ActivationConfig,
    /// Device profiles keyed by device id.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceProfile>,
}

impl ReveilleConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// configured timezone is unknown.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ReveilleConfig = toml::from_str(&content)?;
        config.general.zone()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Backend family of a device; unknown devices are `Generic`.
    pub fn device_family(&self, device: &DeviceRef) -> DeviceFamily {
        self.devices
            .get(device.as_str())
            .map(|p| p.family)
            .unwrap_or_default()
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// IANA zone used for items created without an explicit timezone.
    pub timezone: String,
    /// HTTP API port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.reveille/data".to_string(),
            log_level: "info".to_string(),
            timezone: "UTC".to_string(),
            port: 3040,
        }
    }
}

impl GeneralConfig {
    pub fn zone(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            ReveilleError::Config(format!("Invalid timezone {}: {}", self.timezone, e))
        })
    }
}

/// Playback session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Device used when an item does not name one.
    pub default_device: Option<DeviceRef>,
    pub default_alarm_media: MediaRef,
    pub default_reminder_media: MediaRef,
    /// Cycles after which a session ends as EXPIRED_LOOP.
    pub max_loops: u32,
    /// Wall time after which a session ends as EXPIRED_LOOP.
    pub max_session_secs: u64,
    pub speech_start_timeout_ms: u64,
    pub speech_max_secs: u64,
    pub media_start_timeout_ms: u64,
    /// Pause between cycles of a speech-only sequence.
    pub loop_pause_ms: u64,
    pub command_retries: u32,
    pub command_backoff_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_device: None,
            default_alarm_media: MediaRef::new("/media/local/Alarms/birds.mp3"),
            default_reminder_media: MediaRef::new("/media/local/Alarms/ringtone.mp3"),
            max_loops: 30,
            max_session_secs: 3600,
            speech_start_timeout_ms: 4000,
            speech_max_secs: 40,
            media_start_timeout_ms: 4000,
            loop_pause_ms: 2000,
            command_retries: 3,
            command_backoff_ms: 250,
            command_timeout_ms: 10_000,
        }
    }
}

impl PlaybackConfig {
    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_secs)
    }

    pub fn speech_start_timeout(&self) -> Duration {
        Duration::from_millis(self.speech_start_timeout_ms)
    }

    pub fn speech_max(&self) -> Duration {
        Duration::from_secs(self.speech_max_secs)
    }

    pub fn media_start_timeout(&self) -> Duration {
        Duration::from_millis(self.media_start_timeout_ms)
    }

    pub fn loop_pause(&self) -> Duration {
        Duration::from_millis(self.loop_pause_ms)
    }

    pub fn command_backoff(&self) -> Duration {
        Duration::from_millis(self.command_backoff_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Stop-detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Consecutive noise events that resolve to a user stop.
    pub noise_threshold: u32,
    pub noise_window_secs: u64,
    /// How long an issued command stays attributable to the session.
    pub context_ttl_secs: u64,
    /// Remaining media above `max(min_remaining_secs, remaining_fraction * duration)`
    /// means playback was cut short.
    pub min_remaining_secs: f64,
    pub remaining_fraction: f64,
    /// Remaining media within `max(completion_tolerance_secs, completion_fraction * duration)`
    /// counts as the track finishing.
    pub completion_tolerance_secs: f64,
    pub completion_fraction: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            noise_threshold: 3,
            noise_window_secs: 30,
            context_ttl_secs: 120,
            min_remaining_secs: 3.0,
            remaining_fraction: 0.15,
            completion_tolerance_secs: 0.75,
            completion_fraction: 0.2,
        }
    }
}

impl DetectionConfig {
    pub fn noise_window(&self) -> Duration {
        Duration::from_secs(self.noise_window_secs)
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozeConfig {
    pub default_minutes: u32,
    /// How far ahead of a fire a snooze may defer it.
    pub prefire_window_secs: u64,
}

impl Default for SnoozeConfig {
    fn default() -> Self {
        Self {
            default_minutes: 5,
            prefire_window_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on one sleep, so clock jumps are noticed.
    pub max_sleep_secs: u64,
    /// Fires later than this are reported missed instead of played.
    pub overdue_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_sleep_secs: 60,
            overdue_grace_secs: 3600,
        }
    }
}

impl SchedulerConfig {
    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_secs)
    }
}

/// Entities that items may switch on when they fire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub allowed_entities: Vec<EntityRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub family: DeviceFamily,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ReveilleConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.zone().unwrap(), Tz::UTC);
        assert_eq!(config.snooze.default_minutes, 5);
        assert_eq!(config.detection.noise_threshold, 3);
        assert_eq!(config.playback.command_retries, 3);
        assert!(config.activation.allowed_entities.is_empty());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/var/lib/reveille"
timezone = "Europe/Berlin"

[playback]
default_device = "media_player.bedroom"
max_loops = 5

[snooze]
default_minutes = 9

[activation]
allowed_entities = ["light.bedroom", "switch.coffee"]

[devices."media_player.spotify_kitchen"]
family = "spotify"
"#;
        let file = create_temp_config(content);
        let config = ReveilleConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/var/lib/reveille");
        assert_eq!(config.general.zone().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(
            config.playback.default_device,
            Some(DeviceRef::new("media_player.bedroom"))
        );
        assert_eq!(config.playback.max_loops, 5);
        // Unset fields in a present section keep their defaults.
        assert_eq!(config.playback.command_retries, 3);
        assert_eq!(config.snooze.default_minutes, 9);
        assert_eq!(config.activation.allowed_entities.len(), 2);
        assert_eq!(
            config.device_family(&DeviceRef::new("media_player.spotify_kitchen")),
            DeviceFamily::Spotify
        );
        assert_eq!(
            config.device_family(&DeviceRef::new("media_player.bedroom")),
            DeviceFamily::Generic
        );
    }

    #[test]
    fn test_load_rejects_unknown_timezone() {
        let file = create_temp_config("[general]\ntimezone = \"Mars/Olympus\"\n");
        let err = ReveilleConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ReveilleError::Config(_)));
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = ReveilleConfig::load_or_default(Path::new("/nonexistent/reveille.toml"));
        assert_eq!(config.general.port, 3040);
    }

    #[test]
    fn test_load_or_default_on_invalid_toml() {
        let file = create_temp_config("this is [[[ not toml");
        let config = ReveilleConfig::load_or_default(file.path());
        assert_eq!(config.snooze.default_minutes, 5);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ReveilleConfig::default();
        config.snooze.default_minutes = 7;
        config.devices.insert(
            "media_player.den".to_string(),
            DeviceProfile {
                family: DeviceFamily::MusicAssistant,
            },
        );
        config.save(&path).unwrap();

        let loaded = ReveilleConfig::load(&path).unwrap();
        assert_eq!(loaded.snooze.default_minutes, 7);
        assert_eq!(
            loaded.device_family(&DeviceRef::new("media_player.den")),
            DeviceFamily::MusicAssistant
        );
    }

    #[test]
    fn test_duration_helpers() {
        let playback = PlaybackConfig::default();
        assert_eq!(playback.command_backoff(), Duration::from_millis(250));
        assert_eq!(playback.speech_max(), Duration::from_secs(40));
        assert_eq!(DetectionConfig::default().context_ttl(), Duration::from_secs(120));
        assert_eq!(SchedulerConfig::default().max_sleep(), Duration::from_secs(60));
    }
}
