use std::{fs, path::Path, path::PathBuf, time::Duration};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpioConfig {
    pub sysfs_root: PathBuf,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    pub settings_path: PathBuf,
    pub broadcast_capacity: usize,
    pub event_history_capacity: usize,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }
}

pub type SettingsMap = FxHashMap<String, String>;

pub trait SettingsProvider: Send + Sync {
    fn load(&self) -> Result<SettingsMap, AppError>;
}

pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsProvider for FileSettings {
    fn load(&self) -> Result<SettingsMap, AppError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            AppError::Config(format!(
                "Failed to read settings {}: {e}",
                self.path.display()
            ))
        })?;
        let raw: FxHashMap<String, serde_json::Value> = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid settings json: {e}")))?;

        raw.into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(AppError::Config(format!(
                            "Setting {key} has unsupported value {other}"
                        )));
                    }
                };
                Ok((key, value))
            })
            .collect()
    }
}

#[derive(Default)]
pub struct MapSettings {
    values: RwLock<SettingsMap>,
}

impl MapSettings {
    pub fn new<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

impl SettingsProvider for MapSettings {
    fn load(&self) -> Result<SettingsMap, AppError> {
        Ok(self.values.read().clone())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToggleMode {
    Pulse,
    Hold,
}

impl From<i64> for ToggleMode {
    fn from(raw: i64) -> Self {
        if raw == 0 {
            ToggleMode::Pulse
        } else {
            ToggleMode::Hold
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySettings {
    pub inactivity_timeout: Duration,
    pub use_sense: bool,
    pub export_pins: bool,
    pub sense_pin: u32,
    pub toggle_pin: u32,
    pub toggle_duration: Duration,
    pub toggle_mode: ToggleMode,
}

impl DisplaySettings {
    pub fn load(provider: &dyn SettingsProvider) -> Result<Self, AppError> {
        Self::from_settings(&provider.load()?)
    }

    pub fn from_settings(settings: &SettingsMap) -> Result<Self, AppError> {
        let timeout_minutes: f64 = parse_setting(settings, "inactivity_timeout")?;

        Ok(Self {
            inactivity_timeout: seconds(timeout_minutes * 60.0, "inactivity_timeout")?,
            use_sense: setting(settings, "use_sense")? == "true",
            export_pins: setting(settings, "export_pins")? == "true",
            sense_pin: parse_setting(settings, "sense_pin")?,
            toggle_pin: parse_setting(settings, "toggle_pin")?,
            toggle_duration: seconds(
                parse_setting(settings, "toggle_duration")?,
                "toggle_duration",
            )?,
            toggle_mode: ToggleMode::from(parse_setting::<i64>(settings, "toggle_mode")?),
        })
    }

    pub fn effective_sense_pin(&self) -> u32 {
        if self.use_sense {
            self.sense_pin
        } else {
            self.toggle_pin
        }
    }
}

fn setting<'a>(settings: &'a SettingsMap, key: &str) -> Result<&'a str, AppError> {
    settings
        .get(key)
        .map(|v| v.trim())
        .ok_or_else(|| AppError::Config(format!("Missing setting {key}")))
}

fn parse_setting<T>(settings: &SettingsMap, key: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = setting(settings, key)?;
    raw.parse::<T>()
        .map_err(|e| AppError::Config(format!("Invalid setting {key}={raw:?}: {e}")))
}

fn seconds(value: f64, key: &str) -> Result<Duration, AppError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| AppError::Config(format!("Invalid setting {key}: {e}")))
}
