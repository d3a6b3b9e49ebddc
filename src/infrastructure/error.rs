use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Not connected to Spotify")]
    NotAuthenticated,
    #[error("Spotify session expired; reconnect required")]
    AuthExpired,
    #[error("Rate limited; retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("No active playback device")]
    NoActiveDevice,
    #[error("Spotify api error: {message}")]
    Api { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn api(status: u16, message: Option<String>) -> Self {
        let message = message
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("http {status}"));
        EngineError::Api { status, message }
    }

    /// Transient failures the caller may surface and retry without tearing
    /// down any local state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited { .. } | EngineError::NoActiveDevice | EngineError::Network(_)
        )
    }
}
