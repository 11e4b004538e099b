use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::events::{Event, EventBus};

const STORAGE_DIR_NAME: &str = ".github-notifier";
const SETTINGS_FILE: &str = "settings.json";

pub mod keys {
    pub const DOMAIN: &str = "domain";
    pub const TOKEN: &str = "token";
    pub const REFRESH_INTERVAL: &str = "refresh-interval";
    pub const SHOW_PARTICIPATING_ONLY: &str = "show-participating-only";
    pub const NOTIFICATION_MODE: &str = "notification-mode";
    pub const NOTIFICATION_ACTIVATE_ACTION: &str = "notification-activate-action";
    pub const NOTIFICATION_PRIMARY_ACTION: &str = "notification-primary-action";
    pub const NOTIFICATION_SECONDARY_ACTION: &str = "notification-secondary-action";
    pub const HIDE_NOTIFICATION_COUNT: &str = "hide-notification-count";
    pub const HIDE_WIDGET: &str = "hide-widget";

    pub const ALL: [&str; 10] = [
        DOMAIN,
        TOKEN,
        REFRESH_INTERVAL,
        SHOW_PARTICIPATING_ONLY,
        NOTIFICATION_MODE,
        NOTIFICATION_ACTIVATE_ACTION,
        NOTIFICATION_PRIMARY_ACTION,
        NOTIFICATION_SECONDARY_ACTION,
        HIDE_NOTIFICATION_COUNT,
        HIDE_WIDGET,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl SettingValue {
    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "a boolean",
            SettingValue::Int(_) => "an integer",
            SettingValue::Text(_) => "a string",
        }
    }

    fn same_type(&self, other: &SettingValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::Bool(value) => write!(f, "{value}"),
            SettingValue::Int(value) => write!(f, "{value}"),
            SettingValue::Text(value) => write!(f, "{value}"),
        }
    }
}

pub fn default_value(key: &str) -> Option<SettingValue> {
    let value = match key {
        keys::DOMAIN => SettingValue::Text("github.com".to_owned()),
        keys::TOKEN => SettingValue::Text(String::new()),
        keys::REFRESH_INTERVAL => SettingValue::Int(60),
        keys::SHOW_PARTICIPATING_ONLY => SettingValue::Bool(false),
        keys::NOTIFICATION_MODE => SettingValue::Int(1),
        keys::NOTIFICATION_ACTIVATE_ACTION => SettingValue::Int(1),
        keys::NOTIFICATION_PRIMARY_ACTION => SettingValue::Int(2),
        keys::NOTIFICATION_SECONDARY_ACTION => SettingValue::Int(3),
        keys::HIDE_NOTIFICATION_COUNT => SettingValue::Bool(false),
        keys::HIDE_WIDGET => SettingValue::Bool(false),
        _ => return None,
    };
    Some(value)
}

/// Key-value settings persisted as JSON. Every change is announced on the
/// bus as [`Event::SettingChanged`].
pub struct SettingsStore {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, SettingValue>>,
    bus: EventBus,
}

impl SettingsStore {
    /// Opens `~/.github-notifier/settings.json`.
    pub fn initialize(bus: EventBus) -> Result<Self, SettingsError> {
        let home = env::var("HOME").map_err(|_| SettingsError::HomeDirMissing)?;
        let path = PathBuf::from(home).join(STORAGE_DIR_NAME).join(SETTINGS_FILE);
        Self::open(path, bus)
    }

    pub fn open(path: impl Into<PathBuf>, bus: EventBus) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = read_values(&path)?;
        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
            bus,
        })
    }

    #[cfg(test)]
    pub fn in_memory(bus: EventBus) -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
            bus,
        }
    }

    /// Stored value, or the default when unset or stored with the wrong type.
    pub fn get(&self, key: &str) -> Option<SettingValue> {
        let default = default_value(key)?;
        match self.lock().get(key) {
            Some(value) if value.same_type(&default) => Some(value.clone()),
            _ => Some(default),
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some(SettingValue::Bool(true)))
    }

    pub fn get_int(&self, key: &str) -> i64 {
        match self.get(key) {
            Some(SettingValue::Int(value)) => value,
            _ => 0,
        }
    }

    pub fn get_string(&self, key: &str) -> String {
        match self.get(key) {
            Some(SettingValue::Text(value)) => value,
            _ => String::new(),
        }
    }

    pub fn set(&self, key: &str, value: SettingValue) -> Result<(), SettingsError> {
        let default = default_value(key).ok_or_else(|| SettingsError::UnknownKey(key.to_owned()))?;
        if !value.same_type(&default) {
            return Err(SettingsError::InvalidValue {
                key: key.to_owned(),
                expected: default.type_name(),
            });
        }

        {
            let mut values = self.lock();
            if values.get(key) == Some(&value) {
                return Ok(());
            }
            // Memory only changes once the file holds the new value.
            if let Some(path) = &self.path {
                let mut updated = values.clone();
                updated.insert(key.to_owned(), value.clone());
                write_values(path, &updated)?;
            }
            values.insert(key.to_owned(), value);
        }

        debug!(key, "setting changed");
        self.bus.emit(Event::SettingChanged(key.to_owned()));
        Ok(())
    }

    /// Parses `raw` according to the key's type, for command-line edits.
    pub fn set_from_str(&self, key: &str, raw: &str) -> Result<(), SettingsError> {
        let default = default_value(key).ok_or_else(|| SettingsError::UnknownKey(key.to_owned()))?;
        let invalid = || SettingsError::InvalidValue {
            key: key.to_owned(),
            expected: default.type_name(),
        };
        let value = match default {
            SettingValue::Bool(_) => SettingValue::Bool(raw.trim().parse().map_err(|_| invalid())?),
            SettingValue::Int(_) => SettingValue::Int(raw.trim().parse().map_err(|_| invalid())?),
            SettingValue::Text(_) => SettingValue::Text(raw.to_owned()),
        };
        self.set(key, value)
    }

    pub fn entries(&self) -> Vec<(&'static str, SettingValue)> {
        keys::ALL
            .iter()
            .filter_map(|key| self.get(key).map(|value| (*key, value)))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SettingValue>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_values(path: &Path) -> Result<BTreeMap<String, SettingValue>, SettingsError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(err.into()),
    }
}

fn write_values(path: &Path, values: &BTreeMap<String, SettingValue>) -> Result<(), SettingsError> {
    if let Some(dir) = path.parent()
        && !dir.exists()
    {
        fs::create_dir_all(dir)?;
    }
    let data = serde_json::to_string_pretty(values)?;
    fs::write(path, data)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("HOME environment variable is not set; cannot store settings under ~/.github-notifier")]
    HomeDirMissing,
    #[error("I/O error while handling stored settings: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize stored settings: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Unknown setting \"{0}\"")]
    UnknownKey(String),
    #[error("Setting \"{key}\" expects {expected}")]
    InvalidValue { key: String, expected: &'static str },
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
