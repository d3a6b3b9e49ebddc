use crate::application::auth::SpotifyAuthManager;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::session_store::SessionStore;
use crate::infrastructure::spotify_client::{PlayTarget, SpotifyPlayerClient, SpotifyUser};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

/// Locally tracked rate-limit window. While open, calls are rejected without
/// touching the network; a one-second ticker drains it. At most one ticker
/// is live: opening a new window aborts the stale one.
pub struct RateLimitGate {
    remaining: AtomicU64,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for RateLimitGate {
    fn default() -> Self {
        Self {
            remaining: AtomicU64::new(0),
            ticker: Mutex::new(None),
        }
    }
}

impl RateLimitGate {
    pub fn seconds_remaining(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }

    fn ensure_clear(&self) -> Result<(), EngineError> {
        let remaining = self.seconds_remaining();
        if remaining > 0 {
            return Err(EngineError::RateLimited {
                retry_after_seconds: remaining,
            });
        }
        Ok(())
    }

    /// One second elapsed; returns the seconds still to wait.
    fn tick(&self) -> u64 {
        let mut current = self.remaining.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return 0;
            }
            match self.remaining.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return current - 1,
                Err(observed) => current = observed,
            }
        }
    }

    fn begin(self: &Arc<Self>, seconds: u64) {
        self.remaining.store(seconds, Ordering::SeqCst);

        let Ok(mut ticker) = self.ticker.lock() else {
            return;
        };
        if let Some(stale) = ticker.take() {
            stale.abort();
        }
        if seconds == 0 {
            return;
        }

        let gate = Arc::clone(self);
        *ticker = Some(tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if gate.tick() == 0 {
                    break;
                }
            }
        }));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { user: SpotifyUser },
    AuthorizationRequired { authorize_url: String },
}

/// Hooks the timer session uses to automate music around phase changes.
#[async_trait]
pub trait PlaybackControl: Send + Sync {
    async fn pause_playback(&self) -> Result<(), EngineError>;
    async fn resume_playback(&self) -> Result<(), EngineError>;
}

/// Translates user playback intent into remote calls, absorbing auth expiry
/// and rate limiting. Never auto-retries: after a rate limit the caller
/// decides when to try again, once the window reports zero.
pub struct PlaybackService<C, S>
where
    C: SpotifyPlayerClient,
    S: SessionStore,
{
    client: Arc<C>,
    auth: Arc<SpotifyAuthManager<S>>,
    rate_limit: Arc<RateLimitGate>,
    // The context we already started this session, for resume-not-restart.
    active_target: Mutex<Option<PlayTarget>>,
}

impl<C, S> PlaybackService<C, S>
where
    C: SpotifyPlayerClient,
    S: SessionStore,
{
    pub fn new(client: Arc<C>, auth: Arc<SpotifyAuthManager<S>>) -> Self {
        Self {
            client,
            auth,
            rate_limit: Arc::new(RateLimitGate::default()),
            active_target: Mutex::new(None),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    pub fn rate_limit_seconds(&self) -> u64 {
        self.rate_limit.seconds_remaining()
    }

    /// Passes the redirect fragment through to the auth manager so shells
    /// only need one handle.
    pub fn capture_redirect(
        &self,
        fragment: &str,
    ) -> Result<Option<crate::domain::models::AuthSession>, EngineError> {
        self.auth.capture_redirect(fragment)
    }

    pub async fn connect(&self) -> Result<ConnectOutcome, EngineError> {
        self.rate_limit.ensure_clear()?;

        let Some(session) = self.auth.session()? else {
            return Ok(ConnectOutcome::AuthorizationRequired {
                authorize_url: self.auth.build_authorization_url()?,
            });
        };

        match self.client.current_user(&session.access_token).await {
            Ok(user) => Ok(ConnectOutcome::Connected { user }),
            Err(EngineError::AuthExpired) => {
                self.handle_auth_rejection();
                Ok(ConnectOutcome::AuthorizationRequired {
                    authorize_url: self.auth.build_authorization_url()?,
                })
            }
            Err(error) => Err(self.note_failure(error)),
        }
    }

    /// Starts the requested context, or resumes it when it is already the
    /// active one so the track does not restart from the beginning.
    pub async fn play(&self, target: PlayTarget) -> Result<(), EngineError> {
        let token = self.checked_token()?;

        let resume_only = self
            .active_target
            .lock()
            .ok()
            .map(|active| active.as_ref() == Some(&target))
            .unwrap_or(false);
        let request_target = if resume_only { None } else { Some(&target) };

        match self.client.start_playback(&token, request_target).await {
            Ok(()) => {
                if let Ok(mut active) = self.active_target.lock() {
                    *active = Some(target);
                }
                Ok(())
            }
            Err(error) => Err(self.note_failure(error)),
        }
    }

    /// Resumes whatever context the player already has, without naming one.
    pub async fn resume(&self) -> Result<(), EngineError> {
        let token = self.checked_token()?;
        match self.client.start_playback(&token, None).await {
            Ok(()) => Ok(()),
            Err(error) => Err(self.note_failure(error)),
        }
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        let token = self.checked_token()?;
        match self.client.pause_playback(&token).await {
            Ok(()) => Ok(()),
            Err(error) => Err(self.note_failure(error)),
        }
    }

    pub async fn skip_next(&self) -> Result<(), EngineError> {
        let token = self.checked_token()?;
        match self.client.skip_next(&token).await {
            Ok(()) => Ok(()),
            Err(error) => Err(self.note_failure(error)),
        }
    }

    /// Fire-and-forget: the mute indicator the user just toggled stays as
    /// set, so failures are logged and absorbed rather than surfaced.
    pub async fn set_volume(&self, volume_percent: u8) -> Result<(), EngineError> {
        let token = match self.checked_token() {
            Ok(token) => token,
            Err(error) => {
                debug!("volume change skipped: {error}");
                return Ok(());
            }
        };

        if let Err(error) = self.client.set_volume(&token, volume_percent).await {
            let error = self.note_failure(error);
            warn!("volume change failed: {error}");
        }
        Ok(())
    }

    pub fn logout(&self) -> Result<(), EngineError> {
        if let Ok(mut active) = self.active_target.lock() {
            *active = None;
        }
        self.auth.logout()
    }

    fn checked_token(&self) -> Result<String, EngineError> {
        self.rate_limit.ensure_clear()?;
        match self.auth.session()? {
            Some(session) => Ok(session.access_token),
            None => Err(EngineError::NotAuthenticated),
        }
    }

    /// Bookkeeping for failures that change local state: a rate limit opens
    /// the countdown window, a rejected token forces a logout. The error is
    /// handed back for the caller to surface.
    fn note_failure(&self, error: EngineError) -> EngineError {
        match &error {
            EngineError::RateLimited {
                retry_after_seconds,
            } => {
                self.rate_limit.begin(*retry_after_seconds);
            }
            EngineError::AuthExpired => {
                self.handle_auth_rejection();
            }
            _ => {}
        }
        error
    }

    fn handle_auth_rejection(&self) {
        if let Ok(mut active) = self.active_target.lock() {
            *active = None;
        }
        match self.auth.forced_logout() {
            Ok(true) => {}
            Ok(false) => debug!("session already cleared by a concurrent rejection"),
            Err(error) => warn!("failed to clear rejected session: {error}"),
        }
    }
}

#[async_trait]
impl<C, S> PlaybackControl for PlaybackService<C, S>
where
    C: SpotifyPlayerClient,
    S: SessionStore,
{
    async fn pause_playback(&self) -> Result<(), EngineError> {
        self.pause().await
    }

    async fn resume_playback(&self) -> Result<(), EngineError> {
        self.resume().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::auth::SpotifyAuthConfig;
    use crate::domain::models::AuthSession;
    use crate::infrastructure::session_store::InMemorySessionStore;
    use crate::infrastructure::spotify_client::PlayerState;
    use crate::infrastructure::spotify_client::SpotifyPlaylist;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Copy)]
    enum Scripted {
        Ok,
        AuthExpired,
        RateLimited(u64),
        NoDevice,
        Network,
    }

    impl Scripted {
        fn into_result(self) -> Result<(), EngineError> {
            match self {
                Scripted::Ok => Ok(()),
                Scripted::AuthExpired => Err(EngineError::AuthExpired),
                Scripted::RateLimited(seconds) => Err(EngineError::RateLimited {
                    retry_after_seconds: seconds,
                }),
                Scripted::NoDevice => Err(EngineError::NoActiveDevice),
                Scripted::Network => Err(EngineError::Network("connection reset".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct FakeSpotifyClient {
        play_script: Mutex<VecDeque<Scripted>>,
        pause_script: Mutex<VecDeque<Scripted>>,
        volume_script: Mutex<VecDeque<Scripted>>,
        play_calls: AtomicUsize,
        pause_calls: AtomicUsize,
        skip_calls: AtomicUsize,
        volume_calls: AtomicUsize,
        user_calls: AtomicUsize,
        play_targets: Mutex<Vec<Option<PlayTarget>>>,
    }

    impl FakeSpotifyClient {
        fn script_play(&self, responses: &[Scripted]) {
            let mut guard = self.play_script.lock().expect("play script lock");
            guard.extend(responses.iter().copied());
        }

        fn script_pause(&self, responses: &[Scripted]) {
            let mut guard = self.pause_script.lock().expect("pause script lock");
            guard.extend(responses.iter().copied());
        }

        fn script_volume(&self, responses: &[Scripted]) {
            let mut guard = self.volume_script.lock().expect("volume script lock");
            guard.extend(responses.iter().copied());
        }

        fn next(script: &Mutex<VecDeque<Scripted>>) -> Scripted {
            script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or(Scripted::Ok)
        }

        fn recorded_targets(&self) -> Vec<Option<PlayTarget>> {
            self.play_targets.lock().expect("targets lock").clone()
        }
    }

    #[async_trait]
    impl SpotifyPlayerClient for FakeSpotifyClient {
        async fn current_user(&self, _access_token: &str) -> Result<SpotifyUser, EngineError> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SpotifyUser {
                id: "user-1".to_string(),
                display_name: Some("Listener".to_string()),
                email: None,
            })
        }

        async fn player_state(
            &self,
            _access_token: &str,
        ) -> Result<Option<PlayerState>, EngineError> {
            Ok(None)
        }

        async fn start_playback(
            &self,
            _access_token: &str,
            target: Option<&PlayTarget>,
        ) -> Result<(), EngineError> {
            self.play_calls.fetch_add(1, Ordering::SeqCst);
            self.play_targets
                .lock()
                .expect("targets lock")
                .push(target.cloned());
            Self::next(&self.play_script).into_result()
        }

        async fn pause_playback(&self, _access_token: &str) -> Result<(), EngineError> {
            self.pause_calls.fetch_add(1, Ordering::SeqCst);
            Self::next(&self.pause_script).into_result()
        }

        async fn skip_next(&self, _access_token: &str) -> Result<(), EngineError> {
            self.skip_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn set_volume(
            &self,
            _access_token: &str,
            _volume_percent: u8,
        ) -> Result<(), EngineError> {
            self.volume_calls.fetch_add(1, Ordering::SeqCst);
            Self::next(&self.volume_script).into_result()
        }

        async fn search_playlists(
            &self,
            _access_token: &str,
            _query: &str,
        ) -> Result<Vec<SpotifyPlaylist>, EngineError> {
            Ok(Vec::new())
        }
    }

    /// Session store wrapper that counts deletes, for asserting a forced
    /// logout happened exactly once.
    #[derive(Default)]
    struct CountingSessionStore {
        inner: InMemorySessionStore,
        deletes: AtomicUsize,
    }

    impl SessionStore for CountingSessionStore {
        fn save_session(&self, session: &AuthSession) -> Result<(), EngineError> {
            self.inner.save_session(session)
        }

        fn load_session(&self) -> Result<Option<AuthSession>, EngineError> {
            self.inner.load_session()
        }

        fn delete_session(&self) -> Result<(), EngineError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_session()
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn service_with_store(
        client: Arc<FakeSpotifyClient>,
        store: Arc<CountingSessionStore>,
        authenticated: bool,
    ) -> PlaybackService<FakeSpotifyClient, CountingSessionStore> {
        if authenticated {
            store
                .save_session(&AuthSession {
                    access_token: "BQDtoken".to_string(),
                    expires_at: fixed_now() + ChronoDuration::seconds(3600),
                })
                .expect("seed session");
        }
        let auth = Arc::new(
            SpotifyAuthManager::new(
                SpotifyAuthConfig::new("client-id", "http://localhost:5173/"),
                store,
            )
            .with_now_provider(Arc::new(fixed_now)),
        );
        PlaybackService::new(client, auth)
    }

    fn service(
        client: Arc<FakeSpotifyClient>,
        authenticated: bool,
    ) -> PlaybackService<FakeSpotifyClient, CountingSessionStore> {
        service_with_store(client, Arc::new(CountingSessionStore::default()), authenticated)
    }

    fn playlist() -> PlayTarget {
        PlayTarget::Playlist("spotify:playlist:focus".to_string())
    }

    #[tokio::test]
    async fn calls_require_a_session_without_touching_the_network() {
        let client = Arc::new(FakeSpotifyClient::default());
        let service = service(Arc::clone(&client), false);

        assert!(matches!(
            service.play(playlist()).await,
            Err(EngineError::NotAuthenticated)
        ));
        assert!(matches!(
            service.pause().await,
            Err(EngineError::NotAuthenticated)
        ));
        assert_eq!(client.play_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.pause_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeat_play_of_the_active_target_resumes() {
        let client = Arc::new(FakeSpotifyClient::default());
        let service = service(Arc::clone(&client), true);

        service.play(playlist()).await.expect("first play");
        service.play(playlist()).await.expect("second play");
        service
            .play(PlayTarget::Track("spotify:track:t1".to_string()))
            .await
            .expect("switch target");

        let targets = client.recorded_targets();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], Some(playlist()));
        assert_eq!(targets[1], None);
        assert_eq!(
            targets[2],
            Some(PlayTarget::Track("spotify:track:t1".to_string()))
        );
    }

    #[tokio::test]
    async fn failed_play_does_not_mark_the_target_active() {
        let client = Arc::new(FakeSpotifyClient::default());
        client.script_play(&[Scripted::NoDevice, Scripted::Ok]);
        let service = service(Arc::clone(&client), true);

        assert!(matches!(
            service.play(playlist()).await,
            Err(EngineError::NoActiveDevice)
        ));
        // Retry still starts fresh because the first attempt never played.
        service.play(playlist()).await.expect("retry play");
        let targets = client.recorded_targets();
        assert_eq!(targets[1], Some(playlist()));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_window_blocks_then_drains() {
        let client = Arc::new(FakeSpotifyClient::default());
        client.script_play(&[Scripted::RateLimited(15)]);
        let service = service(Arc::clone(&client), true);

        let error = service.play(playlist()).await.expect_err("rate limited");
        assert!(matches!(
            error,
            EngineError::RateLimited {
                retry_after_seconds: 15
            }
        ));
        assert_eq!(service.rate_limit_seconds(), 15);

        // While the window is open, calls are rejected locally.
        let error = service.pause().await.expect_err("still limited");
        assert!(matches!(error, EngineError::RateLimited { .. }));
        assert_eq!(client.pause_calls.load(Ordering::SeqCst), 0);

        // Exactly 15 one-second decrements drain the window.
        for expected in (0..15).rev() {
            tokio::time::advance(Duration::from_secs(1)).await;
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
            assert_eq!(service.rate_limit_seconds(), expected);
        }

        service.pause().await.expect("permitted again");
        assert_eq!(client.pause_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_auth_rejections_force_exactly_one_logout() {
        let client = Arc::new(FakeSpotifyClient::default());
        client.script_play(&[Scripted::AuthExpired]);
        client.script_pause(&[Scripted::AuthExpired]);
        client.script_volume(&[Scripted::AuthExpired]);

        let store = Arc::new(CountingSessionStore::default());
        let service = Arc::new(service_with_store(
            Arc::clone(&client),
            Arc::clone(&store),
            true,
        ));

        let play = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.play(playlist()).await })
        };
        let pause = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.pause().await })
        };
        let volume = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.set_volume(40).await })
        };

        let play = play.await.expect("join play");
        let pause = pause.await.expect("join pause");
        let volume = volume.await.expect("join volume");

        // Late arrivals may find the session already gone; either way no
        // call panics and the session is cleared exactly once.
        assert!(matches!(
            play,
            Err(EngineError::AuthExpired) | Err(EngineError::NotAuthenticated)
        ));
        assert!(matches!(
            pause,
            Err(EngineError::AuthExpired) | Err(EngineError::NotAuthenticated)
        ));
        assert!(volume.is_ok());
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        assert!(!service.is_authenticated());
    }

    #[tokio::test]
    async fn volume_failures_are_absorbed() {
        let client = Arc::new(FakeSpotifyClient::default());
        client.script_volume(&[Scripted::Network]);
        let service = service(Arc::clone(&client), true);

        service.set_volume(0).await.expect("absorbed failure");
        assert_eq!(client.volume_calls.load(Ordering::SeqCst), 1);

        // Unauthenticated volume changes are silently skipped too.
        service.logout().expect("logout");
        service.set_volume(55).await.expect("skipped");
        assert_eq!(client.volume_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_reports_authorization_url_when_disconnected() {
        let client = Arc::new(FakeSpotifyClient::default());
        let service = service(Arc::clone(&client), false);

        match service.connect().await.expect("connect") {
            ConnectOutcome::AuthorizationRequired { authorize_url } => {
                assert!(authorize_url.contains("client_id=client-id"));
                assert!(authorize_url.contains("response_type=token"));
            }
            other => panic!("expected authorization required, got {other:?}"),
        }
        assert_eq!(client.user_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_probes_the_profile_when_a_session_exists() {
        let client = Arc::new(FakeSpotifyClient::default());
        let service = service(Arc::clone(&client), true);

        match service.connect().await.expect("connect") {
            ConnectOutcome::Connected { user } => assert_eq!(user.id, "user-1"),
            other => panic!("expected connected, got {other:?}"),
        }
        assert_eq!(client.user_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logout_forgets_the_active_context() {
        let client = Arc::new(FakeSpotifyClient::default());
        let store = Arc::new(CountingSessionStore::default());
        let service = service_with_store(Arc::clone(&client), Arc::clone(&store), true);

        service.play(playlist()).await.expect("play");
        service.logout().expect("logout");

        // Re-authenticate: the next play starts fresh, not in resume mode.
        store
            .save_session(&AuthSession {
                access_token: "BQDtoken2".to_string(),
                expires_at: fixed_now() + ChronoDuration::seconds(3600),
            })
            .expect("re-seed session");
        service.play(playlist()).await.expect("play again");

        let targets = client.recorded_targets();
        assert_eq!(targets[1], Some(playlist()));
    }
}
