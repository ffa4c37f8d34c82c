use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "blue_light_meter".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Host-side settings. Protocol constants (UUIDs, scan window) are not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    /// How often the host shell polls the service.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Override for the IIO illuminance file; discovered when unset.
    #[serde(default)]
    pub light_sensor_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            poll_interval_ms: default_poll_interval_ms(),
            light_sensor_path: None,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Settings {
    /// Poll period for the host shell, at least one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Loads and saves [`Settings`] as JSON.
pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BlueLightMeter");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    /// Write the current settings back to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"poll_interval_ms": 100}"#).unwrap();
        assert_eq!(settings.poll_interval_ms, 100);
        assert_eq!(settings.log_settings.level, "info");
        assert!(settings.light_sensor_path.is_none());
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let settings: Settings = serde_json::from_str(r#"{"poll_interval_ms": 0}"#).unwrap();
        assert_eq!(settings.poll_interval(), Duration::from_millis(1));
        assert_eq!(Settings::default().poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("blm-settings-does-not-exist.json");
        let service = SettingsService::from_path(path);
        assert_eq!(service.get().poll_interval_ms, 500);
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!(
            "blm-settings-{}.json",
            std::process::id()
        ));
        let mut service = SettingsService::from_path(path.clone());
        service.get_mut().poll_interval_ms = 250;
        service.get_mut().light_sensor_path = Some("/tmp/lux".to_string());
        service.save().unwrap();

        let reloaded = SettingsService::from_path(path.clone());
        assert_eq!(reloaded.get().poll_interval_ms, 250);
        assert_eq!(reloaded.get().light_sensor_path.as_deref(), Some("/tmp/lux"));
        let _ = fs::remove_file(path);
    }
}
