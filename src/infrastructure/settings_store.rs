use crate::domain::models::AppSettings;
use crate::infrastructure::error::EngineError;
use log::warn;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Load/save contract for the single persisted settings document. Loading
/// merges whatever was stored over the hard defaults; unknown fields are
/// ignored and missing fields fall back to their default value.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<AppSettings, EngineError>;
    fn save(&self, settings: &AppSettings) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn load(&self) -> Result<AppSettings, EngineError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AppSettings::default());
            }
            Err(error) => return Err(error.into()),
        };

        // A corrupt document degrades to defaults rather than blocking the
        // timer; the next save rewrites it.
        match serde_json::from_str::<AppSettings>(&raw) {
            Ok(settings) => Ok(settings),
            Err(error) => {
                warn!(
                    "settings file {} unreadable, using defaults: {error}",
                    self.path.display()
                );
                Ok(AppSettings::default())
            }
        }
    }

    fn save(&self, settings: &AppSettings) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let formatted = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, format!("{formatted}\n"))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    settings: Mutex<Option<AppSettings>>,
}

impl SettingsStore for InMemorySettingsStore {
    fn load(&self) -> Result<AppSettings, EngineError> {
        let guard = self
            .settings
            .lock()
            .map_err(|error| EngineError::Internal(format!("settings lock poisoned: {error}")))?;
        Ok(guard.clone().unwrap_or_default())
    }

    fn save(&self, settings: &AppSettings) -> Result<(), EngineError> {
        let mut guard = self
            .settings
            .lock()
            .map_err(|error| EngineError::Internal(format!("settings lock poisoned: {error}")))?;
        *guard = Some(settings.clone());
        Ok(())
    }
}
