use crate::domain::models::AuthSession;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::session_store::SessionStore;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::sync::{Arc, Mutex};
use url::Url;

const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://accounts.spotify.com/authorize";
const DEFAULT_SCOPE: &str = "streaming user-read-email user-read-private user-library-read \
                             user-library-modify user-read-playback-state user-modify-playback-state";
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct SpotifyAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub authorization_endpoint: String,
}

impl SpotifyAuthConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: DEFAULT_SCOPE.split_whitespace().collect::<Vec<_>>().join(" "),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
        }
    }
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Implicit-grant session manager. The external service hands the token back
/// in the redirect fragment; we parse it once, persist it with an expiry,
/// and the shell strips the fragment from the address bar so a reload never
/// re-parses a stale token.
pub struct SpotifyAuthManager<S>
where
    S: SessionStore,
{
    config: SpotifyAuthConfig,
    session_store: Arc<S>,
    now_provider: NowProvider,
    // Serializes forced logouts so concurrent 401s clear the session once.
    logout_guard: Mutex<()>,
}

impl<S> SpotifyAuthManager<S>
where
    S: SessionStore,
{
    pub fn new(config: SpotifyAuthConfig, session_store: Arc<S>) -> Self {
        Self {
            config,
            session_store,
            now_provider: Arc::new(Utc::now),
            logout_guard: Mutex::new(()),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn build_authorization_url(&self) -> Result<String, EngineError> {
        if self.config.client_id.trim().is_empty() {
            return Err(EngineError::Auth("client id must not be empty".to_string()));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| EngineError::Auth(format!("invalid authorization endpoint: {error}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scope)
            .append_pair("response_type", "token")
            .append_pair("show_dialog", "true");
        Ok(url.to_string())
    }

    /// Parses the redirect fragment (`access_token=...&expires_in=...`) and
    /// persists the captured session. Returns `None` when the fragment does
    /// not carry a token (e.g. the user landed on the page normally).
    pub fn capture_redirect(&self, fragment: &str) -> Result<Option<AuthSession>, EngineError> {
        let fragment = fragment.trim_start_matches('#');
        let mut access_token = None;
        let mut expires_in = None;

        for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
            match key.as_ref() {
                "access_token" => access_token = Some(value.into_owned()),
                "expires_in" => expires_in = value.parse::<i64>().ok(),
                _ => {}
            }
        }

        let Some(access_token) = access_token.filter(|token| !token.trim().is_empty()) else {
            return Ok(None);
        };

        let expires_in = expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECONDS).max(0);
        let session = AuthSession {
            access_token,
            expires_at: (self.now_provider)() + Duration::seconds(expires_in),
        };
        self.session_store.save_session(&session)?;
        info!("captured spotify session, expires in {expires_in}s");
        Ok(Some(session))
    }

    /// The stored session, if it is still inside its expiry window. An
    /// expired session is cleared on the spot.
    pub fn session(&self) -> Result<Option<AuthSession>, EngineError> {
        let Some(session) = self.session_store.load_session()? else {
            return Ok(None);
        };
        if session.is_valid_at((self.now_provider)()) {
            return Ok(Some(session));
        }
        warn!("stored spotify session expired, clearing it");
        self.session_store.delete_session()?;
        Ok(None)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.session(), Ok(Some(_)))
    }

    pub fn logout(&self) -> Result<(), EngineError> {
        self.session_store.delete_session()
    }

    /// Logout driven by a 401 from the remote. Returns whether a session was
    /// actually cleared; concurrent callers racing on the same rejection see
    /// `false` after the first one wins.
    pub fn forced_logout(&self) -> Result<bool, EngineError> {
        let _guard = self
            .logout_guard
            .lock()
            .map_err(|error| EngineError::Internal(format!("logout guard poisoned: {error}")))?;
        if self.session_store.load_session()?.is_none() {
            return Ok(false);
        }
        self.session_store.delete_session()?;
        info!("spotify session rejected by the service, forced logout");
        Ok(true)
    }
}
