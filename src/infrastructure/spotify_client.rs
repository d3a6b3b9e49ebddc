use crate::infrastructure::error::EngineError;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

const API_BASE: &str = "https://api.spotify.com/v1/";
const WEB_PLAYER_BASE: &str = "https://open.spotify.com";
const DEFAULT_RETRY_AFTER_SECONDS: u64 = 10;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpotifyUser {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpotifyImage {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpotifyArtist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpotifyAlbum {
    pub name: String,
    #[serde(default)]
    pub images: Vec<SpotifyImage>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpotifyTrack {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub artists: Vec<SpotifyArtist>,
    pub album: Option<SpotifyAlbum>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct PlaylistTracks {
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpotifyPlaylist {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<SpotifyImage>,
    #[serde(default)]
    pub tracks: PlaylistTracks,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpotifyDevice {
    pub id: Option<String>,
    pub name: String,
    pub volume_percent: Option<u8>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PlayerState {
    pub is_playing: bool,
    pub progress_ms: Option<u64>,
    pub item: Option<SpotifyTrack>,
    pub device: Option<SpotifyDevice>,
}

/// What a play request should put on the player: a playlist is sent as a
/// context so the service handles track order, a single track is sent as a
/// one-element uri list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayTarget {
    Playlist(String),
    Track(String),
}

impl PlayTarget {
    pub fn from_uri(uri: &str) -> Self {
        if uri.contains("playlist") {
            Self::Playlist(uri.to_string())
        } else {
            Self::Track(uri.to_string())
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Self::Playlist(uri) | Self::Track(uri) => uri,
        }
    }
}

#[async_trait]
pub trait SpotifyPlayerClient: Send + Sync {
    async fn current_user(&self, access_token: &str) -> Result<SpotifyUser, EngineError>;

    /// `None` means the account has no player state at all (nothing ever
    /// started), which the service reports as 204.
    async fn player_state(&self, access_token: &str) -> Result<Option<PlayerState>, EngineError>;

    /// `target: None` resumes whatever context is already active instead of
    /// restarting it from the beginning.
    async fn start_playback(
        &self,
        access_token: &str,
        target: Option<&PlayTarget>,
    ) -> Result<(), EngineError>;

    async fn pause_playback(&self, access_token: &str) -> Result<(), EngineError>;

    async fn skip_next(&self, access_token: &str) -> Result<(), EngineError>;

    async fn set_volume(&self, access_token: &str, volume_percent: u8)
        -> Result<(), EngineError>;

    async fn search_playlists(
        &self,
        access_token: &str,
        query: &str,
    ) -> Result<Vec<SpotifyPlaylist>, EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestSpotifyClient {
    client: Client,
}

#[derive(Debug, Serialize)]
struct PlayRequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    context_uri: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uris: Option<Vec<&'a str>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    playlists: Option<SearchPlaylistsPage>,
}

#[derive(Debug, Deserialize)]
struct SearchPlaylistsPage {
    // The search endpoint is known to return null entries in `items`.
    items: Option<Vec<Option<SpotifyPlaylist>>>,
}

impl ReqwestSpotifyClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn endpoint(segments: &[&str]) -> Result<Url, EngineError> {
        let mut url = Url::parse(API_BASE)
            .map_err(|error| EngineError::Internal(format!("invalid api base url: {error}")))?;
        {
            let mut parts = url
                .path_segments_mut()
                .map_err(|_| EngineError::Internal("api base URL cannot be a base".to_string()))?;
            for segment in segments {
                parts.push(segment);
            }
        }
        Ok(url)
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), EngineError> {
        if value.trim().is_empty() {
            return Err(EngineError::Auth(format!("{field} must not be empty")));
        }
        Ok(())
    }

    async fn execute_control(
        &self,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<(), EngineError> {
        let response = request
            .send()
            .await
            .map_err(|error| EngineError::Network(format!("{action}: {error}")))?;

        let status = response.status();
        let retry_after = retry_after_seconds(response.headers());
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            return Ok(());
        }
        Err(player_error(status, retry_after, &body))
    }
}

#[async_trait]
impl SpotifyPlayerClient for ReqwestSpotifyClient {
    async fn current_user(&self, access_token: &str) -> Result<SpotifyUser, EngineError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let response = self
            .client
            .get(Self::endpoint(&["me"])?)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| EngineError::Network(format!("fetching profile: {error}")))?;

        let status = response.status();
        let retry_after = retry_after_seconds(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(api_error(status, retry_after, &body));
        }

        serde_json::from_str(&body)
            .map_err(|error| EngineError::api(status.as_u16(), Some(format!("invalid profile payload: {error}"))))
    }

    async fn player_state(&self, access_token: &str) -> Result<Option<PlayerState>, EngineError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let response = self
            .client
            .get(Self::endpoint(&["me", "player"])?)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| EngineError::Network(format!("fetching player state: {error}")))?;

        let status = response.status();
        let retry_after = retry_after_seconds(response.headers());
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::NO_CONTENT || (status.is_success() && body.trim().is_empty()) {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(player_error(status, retry_after, &body));
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|error| {
                EngineError::api(status.as_u16(), Some(format!("invalid player payload: {error}")))
            })
    }

    async fn start_playback(
        &self,
        access_token: &str,
        target: Option<&PlayTarget>,
    ) -> Result<(), EngineError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let mut request = self
            .client
            .put(Self::endpoint(&["me", "player", "play"])?)
            .bearer_auth(access_token);
        if let Some(target) = target {
            request = request.json(&play_request_body(target));
        }
        self.execute_control(request, "starting playback").await
    }

    async fn pause_playback(&self, access_token: &str) -> Result<(), EngineError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let request = self
            .client
            .put(Self::endpoint(&["me", "player", "pause"])?)
            .bearer_auth(access_token);
        self.execute_control(request, "pausing playback").await
    }

    async fn skip_next(&self, access_token: &str) -> Result<(), EngineError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let request = self
            .client
            .post(Self::endpoint(&["me", "player", "next"])?)
            .bearer_auth(access_token);
        self.execute_control(request, "skipping track").await
    }

    async fn set_volume(
        &self,
        access_token: &str,
        volume_percent: u8,
    ) -> Result<(), EngineError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let mut url = Self::endpoint(&["me", "player", "volume"])?;
        url.query_pairs_mut()
            .append_pair("volume_percent", &volume_percent.min(100).to_string());
        let request = self.client.put(url).bearer_auth(access_token);
        self.execute_control(request, "setting volume").await
    }

    async fn search_playlists(
        &self,
        access_token: &str,
        query: &str,
    ) -> Result<Vec<SpotifyPlaylist>, EngineError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(query, "search query")?;

        let mut url = Self::endpoint(&["search"])?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("type", "playlist")
            .append_pair("limit", "5");

        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| EngineError::Network(format!("searching playlists: {error}")))?;

        let status = response.status();
        let retry_after = retry_after_seconds(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(api_error(status, retry_after, &body));
        }

        let parsed: SearchResponse = serde_json::from_str(&body).map_err(|error| {
            EngineError::api(status.as_u16(), Some(format!("invalid search payload: {error}")))
        })?;
        Ok(parsed
            .playlists
            .and_then(|page| page.items)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect())
    }
}

fn play_request_body(target: &PlayTarget) -> PlayRequestBody<'_> {
    match target {
        PlayTarget::Playlist(uri) => PlayRequestBody {
            context_uri: Some(uri),
            uris: None,
        },
        PlayTarget::Track(uri) => PlayRequestBody {
            context_uri: None,
            uris: Some(vec![uri]),
        },
    }
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("Retry-After")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn body_message(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .and_then(|detail| detail.message)
        .filter(|message| !message.trim().is_empty())
}

/// Status mapping for the player control endpoints, where 404 means no
/// active output device.
fn player_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> EngineError {
    match status {
        StatusCode::UNAUTHORIZED => EngineError::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => EngineError::RateLimited {
            retry_after_seconds: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECONDS),
        },
        StatusCode::NOT_FOUND => EngineError::NoActiveDevice,
        _ => EngineError::api(status.as_u16(), body_message(body)),
    }
}

/// Status mapping for the non-player endpoints (profile, search).
fn api_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> EngineError {
    match status {
        StatusCode::UNAUTHORIZED => EngineError::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => EngineError::RateLimited {
            retry_after_seconds: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECONDS),
        },
        _ => EngineError::api(status.as_u16(), body_message(body)),
    }
}

/// Converts a `spotify:playlist:<id>` uri into the public web-player URL so
/// the shell can hand users off when no device is active.
pub fn web_player_url(playlist_uri: &str) -> Option<String> {
    let id = playlist_uri.rsplit(':').next()?;
    if id.is_empty() || id == playlist_uri {
        return None;
    }
    Some(format!("{WEB_PLAYER_BASE}/playlist/{id}"))
}

/// Curated fallback playlists for when search is unavailable.
pub fn builtin_focus_playlists() -> Vec<SpotifyPlaylist> {
    vec![SpotifyPlaylist {
        id: "7LAZHtK5BPjA50SwNK5E3D".to_string(),
        name: "fruit loops".to_string(),
        uri: "spotify:playlist:7LAZHtK5BPjA50SwNK5E3D".to_string(),
        description: Some(
            "Jazz Fruits Music - A personal collection of relaxing jazz beats.".to_string(),
        ),
        images: Vec::new(),
        tracks: PlaylistTracks { total: 30 },
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn play_target_detects_playlists() {
        assert_eq!(
            PlayTarget::from_uri("spotify:playlist:abc"),
            PlayTarget::Playlist("spotify:playlist:abc".to_string())
        );
        assert_eq!(
            PlayTarget::from_uri("spotify:track:xyz"),
            PlayTarget::Track("spotify:track:xyz".to_string())
        );
    }

    #[test]
    fn play_body_shape_matches_target_kind() {
        let playlist = PlayTarget::Playlist("spotify:playlist:abc".to_string());
        let body = serde_json::to_string(&play_request_body(&playlist)).expect("serialize");
        assert_eq!(body, r#"{"context_uri":"spotify:playlist:abc"}"#);

        let track = PlayTarget::Track("spotify:track:xyz".to_string());
        let body = serde_json::to_string(&play_request_body(&track)).expect("serialize");
        assert_eq!(body, r#"{"uris":["spotify:track:xyz"]}"#);
    }

    #[test]
    fn retry_after_header_parses_or_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("15"));
        assert_eq!(retry_after_seconds(&headers), Some(15));

        headers.insert("Retry-After", HeaderValue::from_static("soon"));
        assert_eq!(retry_after_seconds(&headers), None);

        let error = player_error(StatusCode::TOO_MANY_REQUESTS, None, "");
        assert!(matches!(
            error,
            EngineError::RateLimited {
                retry_after_seconds: 10
            }
        ));
    }

    #[test]
    fn player_status_mapping() {
        assert!(matches!(
            player_error(StatusCode::UNAUTHORIZED, None, ""),
            EngineError::AuthExpired
        ));
        assert!(matches!(
            player_error(StatusCode::NOT_FOUND, None, ""),
            EngineError::NoActiveDevice
        ));
        assert!(matches!(
            player_error(
                StatusCode::TOO_MANY_REQUESTS,
                Some(15),
                r#"{"error":{"status":429,"message":"slow down"}}"#
            ),
            EngineError::RateLimited {
                retry_after_seconds: 15
            }
        ));
    }

    #[test]
    fn error_bodies_are_tolerated() {
        let with_message = player_error(
            StatusCode::FORBIDDEN,
            None,
            r#"{"error":{"status":403,"message":"Premium required"}}"#,
        );
        assert_eq!(
            with_message.to_string(),
            "Spotify api error: Premium required"
        );

        let not_json = player_error(StatusCode::BAD_GATEWAY, None, "<html>oops</html>");
        assert_eq!(not_json.to_string(), "Spotify api error: http 502");

        let empty = player_error(StatusCode::INTERNAL_SERVER_ERROR, None, "");
        assert_eq!(empty.to_string(), "Spotify api error: http 500");
    }

    #[test]
    fn non_player_404_is_not_a_device_error() {
        assert!(matches!(
            api_error(StatusCode::NOT_FOUND, None, ""),
            EngineError::Api { status: 404, .. }
        ));
    }

    #[test]
    fn web_player_url_converts_playlist_uris() {
        assert_eq!(
            web_player_url("spotify:playlist:7LAZ").as_deref(),
            Some("https://open.spotify.com/playlist/7LAZ")
        );
        assert_eq!(web_player_url("not-a-uri"), None);
    }

    #[test]
    fn search_payload_tolerates_null_items() {
        let parsed: SearchResponse = serde_json::from_str(
            r#"{"playlists":{"items":[null,{"id":"p1","name":"deep focus","uri":"spotify:playlist:p1"}]}}"#,
        )
        .expect("deserialize search payload");
        let items: Vec<SpotifyPlaylist> = parsed
            .playlists
            .and_then(|page| page.items)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "deep focus");
        assert_eq!(items[0].tracks.total, 0);
    }
}
