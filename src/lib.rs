//! Pomodoro timer engine with an optional Spotify playback bridge.
//!
//! The crate is the headless core of the app: the countdown/phase state
//! machine, completion notifications, auto-advance, persisted settings, and
//! the remote playback client. A UI shell supplies the capability
//! implementations (audio cue, system notifications, page visibility) and
//! renders the snapshots and events the session publishes.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::auth::{SpotifyAuthConfig, SpotifyAuthManager};
pub use application::auto_advance::{AutoAdvanceController, AutoAdvanceState, DEFAULT_GRACE_DELAY};
pub use application::notifications::NotificationGateway;
pub use application::playback::{ConnectOutcome, PlaybackControl, PlaybackService};
pub use application::session::{PomodoroSession, SessionEvent};
pub use domain::models::{
    AppSettings, AuthSession, Phase, Theme, TimerRunState, TimerSettings,
};
pub use infrastructure::capabilities::{AlertChannel, CuePlayer, VisibilityProbe};
pub use infrastructure::error::EngineError;
pub use infrastructure::session_store::{InMemorySessionStore, JsonFileSessionStore, SessionStore};
pub use infrastructure::settings_store::{
    InMemorySettingsStore, JsonFileSettingsStore, SettingsStore,
};
pub use infrastructure::spotify_client::{
    builtin_focus_playlists, web_player_url, PlayTarget, PlayerState, ReqwestSpotifyClient,
    SpotifyPlayerClient, SpotifyPlaylist, SpotifyTrack, SpotifyUser,
};

#[cfg(feature = "audio")]
pub use infrastructure::capabilities::RodioCuePlayer;
