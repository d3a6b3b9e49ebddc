use crate::domain::models::AuthSession;
use crate::infrastructure::error::EngineError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Persisted auth session for the external playback service. Lives in its
/// own file next to the settings document so clearing credentials never
/// touches timer preferences.
pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &AuthSession) -> Result<(), EngineError>;
    fn load_session(&self) -> Result<Option<AuthSession>, EngineError>;
    fn delete_session(&self) -> Result<(), EngineError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    access_token: String,
    expires_at_epoch_ms: i64,
}

impl StoredSession {
    fn from_session(session: &AuthSession) -> Self {
        Self {
            access_token: session.access_token.clone(),
            expires_at_epoch_ms: session.expires_at.timestamp_millis(),
        }
    }

    fn into_session(self) -> Result<AuthSession, EngineError> {
        let expires_at: DateTime<Utc> = Utc
            .timestamp_millis_opt(self.expires_at_epoch_ms)
            .single()
            .ok_or_else(|| {
                EngineError::Auth(format!(
                    "stored session has invalid expiry {}",
                    self.expires_at_epoch_ms
                ))
            })?;
        Ok(AuthSession {
            access_token: self.access_token,
            expires_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    path: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStore for JsonFileSessionStore {
    fn save_session(&self, session: &AuthSession) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&StoredSession::from_session(session))?;
        fs::write(&self.path, format!("{payload}\n"))?;
        Ok(())
    }

    fn load_session(&self) -> Result<Option<AuthSession>, EngineError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let stored: StoredSession = serde_json::from_str(&raw)?;
        Ok(Some(stored.into_session()?))
    }

    fn delete_session(&self) -> Result<(), EngineError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<AuthSession>>,
}

impl SessionStore for InMemorySessionStore {
    fn save_session(&self, session: &AuthSession) -> Result<(), EngineError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|error| EngineError::Internal(format!("session lock poisoned: {error}")))?;
        *guard = Some(session.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<AuthSession>, EngineError> {
        let guard = self
            .session
            .lock()
            .map_err(|error| EngineError::Internal(format!("session lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_session(&self) -> Result<(), EngineError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|error| EngineError::Internal(format!("session lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
