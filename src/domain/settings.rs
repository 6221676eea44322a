use crate::domain::models::Lens;
use crate::infrastructure::turntable::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

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
    "panorama_rig".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Tuning for the rotation-settled decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilitySettings {
    #[serde(default = "default_alpha")]
    pub smoothing_alpha: f32,
    #[serde(default = "default_settle_threshold")]
    pub settle_threshold: f32,
    /// Extra wait after each rotate command before a capture may fire
    #[serde(default)]
    pub min_dwell_ms: Option<u64>,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            smoothing_alpha: default_alpha(),
            settle_threshold: default_settle_threshold(),
            min_dwell_ms: None,
        }
    }
}

fn default_alpha() -> f32 {
    0.4
}
fn default_settle_threshold() -> f32 {
    0.01
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurntableSettings {
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,
    #[serde(default = "default_write_uuid")]
    pub write_char_uuid: Uuid,
    #[serde(default = "default_notify_uuid")]
    pub notify_char_uuid: Uuid,
    #[serde(default = "default_split_delay_ms")]
    pub reset_split_delay_ms: u64,
}

impl Default for TurntableSettings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            service_uuid: default_service_uuid(),
            write_char_uuid: default_write_uuid(),
            notify_char_uuid: default_notify_uuid(),
            reset_split_delay_ms: default_split_delay_ms(),
        }
    }
}

impl TurntableSettings {
    pub fn reset_split_delay(&self) -> Duration {
        Duration::from_millis(self.reset_split_delay_ms)
    }
}

fn default_device_name() -> String {
    protocol::DEVICE_NAME.to_string()
}
fn default_service_uuid() -> Uuid {
    protocol::SERVICE_UUID
}
fn default_write_uuid() -> Uuid {
    protocol::WRITE_CHAR_UUID
}
fn default_notify_uuid() -> Uuid {
    protocol::NOTIFY_CHAR_UUID
}
fn default_split_delay_ms() -> u64 {
    500
}

/// Which BLE backend drives the turntable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Simulated,
    Btleplug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub use_gyro_stability_gate: bool,
    #[serde(default)]
    pub exposure_bracket_mode: u8,
    #[serde(default)]
    pub lens: Lens,
    #[serde(default = "default_focus_distance")]
    pub focus_distance: f32,
    #[serde(default = "default_first_shot_delay_ms")]
    pub first_shot_delay_ms: u64,

    #[serde(default)]
    pub stability: StabilitySettings,
    #[serde(default)]
    pub turntable: TurntableSettings,
    #[serde(default)]
    pub transport: TransportKind,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_gyro_stability_gate: true,
            exposure_bracket_mode: 0,
            lens: Lens::default(),
            focus_distance: default_focus_distance(),
            first_shot_delay_ms: default_first_shot_delay_ms(),
            stability: StabilitySettings::default(),
            turntable: TurntableSettings::default(),
            transport: TransportKind::default(),
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn first_shot_delay(&self) -> Duration {
        Duration::from_millis(self.first_shot_delay_ms)
    }
}

fn default_focus_distance() -> f32 {
    0.4
}
fn default_first_shot_delay_ms() -> u64 {
    500
}

/// Read/write port for persisted settings
pub trait SettingsStore: Send {
    fn load(&self) -> anyhow::Result<Settings>;
    fn save(&self, settings: &Settings) -> anyhow::Result<()>;
}

/// Pretty-printed JSON file
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/Panorama360/settings.json`
    pub fn in_config_dir() -> anyhow::Result<Self> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("Panorama360");
        path.push("settings.json");
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(&self.path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<Settings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(settings: Settings) -> Self {
        Self {
            saved: Mutex::new(Some(settings)),
        }
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> anyhow::Result<Settings> {
        let saved = self
            .saved
            .lock()
            .map_err(|_| anyhow::anyhow!("Lock error"))?;
        saved
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No settings saved"))
    }

    fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| anyhow::anyhow!("Lock error"))?;
        *saved = Some(settings.clone());
        Ok(())
    }
}

pub struct SettingsService {
    settings: Settings,
    store: Box<dyn SettingsStore>,
}

impl SettingsService {
    /// Load from `store`, falling back to defaults when nothing usable is stored
    pub fn new(store: Box<dyn SettingsStore>) -> Self {
        let settings = match store.load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings: {}", e);
                Settings::default()
            }
        };
        Self { settings, store }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.store.save(&self.settings)
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn update_bracket_mode(&mut self, mode: u8) -> anyhow::Result<()> {
        self.settings.exposure_bracket_mode = mode;
        self.save()
    }

    pub fn update_use_gyro(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.settings.use_gyro_stability_gate = enabled;
        self.save()
    }

    pub fn update_lens(&mut self, lens: Lens) -> anyhow::Result<()> {
        self.settings.lens = lens;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.use_gyro_stability_gate);
        assert_eq!(settings.exposure_bracket_mode, 0);
        assert_eq!(settings.lens, Lens::Wide);
        assert_eq!(settings.first_shot_delay(), Duration::from_millis(500));
        assert_eq!(settings.stability.smoothing_alpha, 0.4);
        assert_eq!(settings.stability.settle_threshold, 0.01);
        assert_eq!(settings.stability.min_dwell_ms, None);
        assert_eq!(settings.turntable.device_name, "Matterport Axis");
        assert_eq!(settings.turntable.notify_char_uuid, protocol::NOTIFY_CHAR_UUID);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "exposure_bracket_mode": 2, "lens": "ultra_wide" }"#)
                .unwrap();
        assert_eq!(settings.exposure_bracket_mode, 2);
        assert_eq!(settings.lens, Lens::UltraWide);
        assert!(settings.use_gyro_stability_gate);
        assert_eq!(settings.turntable.reset_split_delay_ms, 500);
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("settings.json"));

        let mut settings = Settings::default();
        settings.exposure_bracket_mode = 3;
        settings.use_gyro_stability_gate = false;
        store.save(&settings).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.exposure_bracket_mode, 3);
        assert!(!loaded.use_gyro_stability_gate);
    }

    #[test]
    fn test_service_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::new(Box::new(JsonFileStore::new(&path)));
        assert_eq!(service.get().exposure_bracket_mode, 0);
    }

    #[test]
    fn test_bracket_mode_persists_across_services() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::new(Box::new(JsonFileStore::new(&path)));
        service.update_bracket_mode(2).unwrap();

        let reloaded = SettingsService::new(Box::new(JsonFileStore::new(&path)));
        assert_eq!(reloaded.get().exposure_bracket_mode, 2);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load().is_err());
        store.save(&Settings::default()).unwrap();
        assert!(store.load().is_ok());
    }
}
