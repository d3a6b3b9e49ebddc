use crate::domain::models::Phase;
use crate::infrastructure::capabilities::{AlertChannel, CuePlayer, VisibilityProbe};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::sync::{Arc, Mutex};

const DEBOUNCE_WINDOW_MS: i64 = 1_000;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Default)]
struct GatewayState {
    last_delivery: Option<DateTime<Utc>>,
    deferred_cue: bool,
}

/// Delivers the phase-completion signal: a short audio cue plus a system
/// notification. At most one delivery happens per completion even when the
/// completion path fires more than once in quick succession, and a cue that
/// lands while the surface is hidden is held until visibility returns.
pub struct NotificationGateway {
    cue: Arc<dyn CuePlayer>,
    alerts: Arc<dyn AlertChannel>,
    visibility: Arc<dyn VisibilityProbe>,
    permission_granted: bool,
    state: Mutex<GatewayState>,
    now_provider: NowProvider,
}

impl NotificationGateway {
    /// Requests notification permission exactly once, here; it is never
    /// re-prompted afterwards.
    pub fn new(
        cue: Arc<dyn CuePlayer>,
        alerts: Arc<dyn AlertChannel>,
        visibility: Arc<dyn VisibilityProbe>,
    ) -> Self {
        let permission_granted = alerts.request_permission();
        if !permission_granted {
            debug!("system notifications unavailable; sound-only mode");
        }
        Self {
            cue,
            alerts,
            visibility,
            permission_granted,
            state: Mutex::new(GatewayState::default()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Hook for user gestures (timer toggles, settings clicks). Idempotent.
    pub fn unlock_audio(&self) -> bool {
        self.cue.unlock()
    }

    pub fn audio_unlocked(&self) -> bool {
        self.cue.is_unlocked()
    }

    /// Returns whether this call actually delivered, or was swallowed by the
    /// debounce window.
    pub fn notify_phase_complete(&self, completed: Phase) -> bool {
        let now = (self.now_provider)();
        {
            let Ok(mut state) = self.state.lock() else {
                return false;
            };
            if let Some(last) = state.last_delivery {
                if now - last < Duration::milliseconds(DEBOUNCE_WINDOW_MS) {
                    debug!("duplicate completion signal within debounce window, dropped");
                    return false;
                }
            }
            state.last_delivery = Some(now);

            if self.visibility.is_visible() {
                self.cue.play_cue();
            } else {
                state.deferred_cue = true;
            }
        }

        let (title, body) = completion_message(completed);
        if self.permission_granted {
            if let Err(error) = self.alerts.show(title, body) {
                warn!("failed to show system notification: {error}");
            }
        }
        true
    }

    /// Called when the surface becomes visible again; replays a deferred
    /// cue exactly once.
    pub fn flush_deferred(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.deferred_cue && self.visibility.is_visible() {
            state.deferred_cue = false;
            self.cue.play_cue();
        }
    }
}

fn completion_message(completed: Phase) -> (&'static str, &'static str) {
    match completed {
        Phase::Focus => ("Work session complete!", "Time for a break."),
        Phase::ShortBreak | Phase::LongBreak => ("Break time over", "Ready to focus again?"),
    }
}
