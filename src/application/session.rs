use crate::application::auto_advance::{
    AutoAdvanceController, AutoAdvanceState, DEFAULT_GRACE_DELAY,
};
use crate::application::countdown::{self, TickOutcome};
use crate::application::notifications::NotificationGateway;
use crate::application::playback::PlaybackControl;
use crate::application::sequencer;
use crate::domain::models::{AppSettings, Phase, TimerRunState};
use crate::infrastructure::error::EngineError;
use crate::infrastructure::settings_store::SettingsStore;
use log::{info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionEvent {
    Tick {
        phase: Phase,
        seconds_remaining: u32,
    },
    PhaseCompleted {
        phase: Phase,
    },
    PhaseChanged {
        phase: Phase,
        auto_start_pending: bool,
    },
    AutoStartFired {
        phase: Phase,
    },
}

#[derive(Debug)]
struct SessionCore {
    run: TimerRunState,
    settings: AppSettings,
}

struct Shared {
    core: Mutex<SessionCore>,
    events: broadcast::Sender<SessionEvent>,
    gateway: NotificationGateway,
    auto_advance: AutoAdvanceController,
    ticker: StdMutex<Option<JoinHandle<()>>>,
    music: Option<Arc<dyn PlaybackControl>>,
}

/// The one owner of timer transitions. The countdown ticker, the phase
/// sequencer, the notification gateway and the auto-advance controller all
/// hang off this facade; observers follow along on the broadcast channel
/// instead of reaching into each other's state.
pub struct PomodoroSession {
    shared: Arc<Shared>,
    settings_store: Arc<dyn SettingsStore>,
}

impl PomodoroSession {
    pub fn new(
        settings: AppSettings,
        settings_store: Arc<dyn SettingsStore>,
        gateway: NotificationGateway,
        music: Option<Arc<dyn PlaybackControl>>,
    ) -> Self {
        Self::with_grace_delay(settings, settings_store, gateway, music, DEFAULT_GRACE_DELAY)
    }

    pub fn with_grace_delay(
        settings: AppSettings,
        settings_store: Arc<dyn SettingsStore>,
        gateway: NotificationGateway,
        music: Option<Arc<dyn PlaybackControl>>,
        grace_delay: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let run = TimerRunState::new(&settings.timer_settings);
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(SessionCore { run, settings }),
                events,
                gateway,
                auto_advance: AutoAdvanceController::new(grace_delay),
                ticker: StdMutex::new(None),
                music,
            }),
            settings_store,
        }
    }

    /// Builds the session from whatever the settings store holds, merged
    /// over defaults.
    pub fn load(
        settings_store: Arc<dyn SettingsStore>,
        gateway: NotificationGateway,
        music: Option<Arc<dyn PlaybackControl>>,
    ) -> Result<Self, EngineError> {
        let settings = settings_store.load()?;
        Ok(Self::new(settings, settings_store, gateway, music))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub async fn snapshot(&self) -> TimerRunState {
        self.shared.core.lock().await.run.clone()
    }

    pub async fn settings(&self) -> AppSettings {
        self.shared.core.lock().await.settings.clone()
    }

    pub fn auto_advance_state(&self) -> AutoAdvanceState {
        self.shared.auto_advance.state()
    }

    /// Start/pause control. Counts as a user gesture, so it also unlocks the
    /// audio capability for later cues.
    pub async fn toggle(&self) -> TimerRunState {
        self.shared.gateway.unlock_audio();

        let mut core = self.shared.core.lock().await;
        if core.run.is_running {
            core.run.is_running = false;
            drop(core);
            abort_ticker(&self.shared);
            self.shared.auto_advance.cancel_pending();
            self.shared.auto_advance.note_stopped();
        } else {
            self.shared.auto_advance.note_manual_start();
            {
                let core = &mut *core;
                countdown::arm(&mut core.run, &core.settings.timer_settings);
            }
            drop(core);
            spawn_ticker(&self.shared);
        }
        self.snapshot().await
    }

    /// Stop and reload the active phase's full duration. The completed-work
    /// counter survives; only a new session resets it.
    pub async fn reset(&self) -> TimerRunState {
        self.shared.auto_advance.cancel_pending();
        self.shared.auto_advance.note_stopped();
        abort_ticker(&self.shared);

        let mut core = self.shared.core.lock().await;
        core.run.is_running = false;
        core.run.seconds_remaining = core.settings.timer_settings.duration_for(core.run.phase);
        let snapshot = core.run.clone();
        drop(core);

        emit(
            &self.shared,
            SessionEvent::PhaseChanged {
                phase: snapshot.phase,
                auto_start_pending: false,
            },
        );
        snapshot
    }

    /// Manual phase override: bypasses the sequencer and suppresses any
    /// pending auto-start.
    pub async fn switch_phase(&self, phase: Phase) -> TimerRunState {
        self.shared.auto_advance.cancel_pending();
        self.shared.auto_advance.note_stopped();
        abort_ticker(&self.shared);

        let mut core = self.shared.core.lock().await;
        core.run.phase = phase;
        core.run.seconds_remaining = core.settings.timer_settings.duration_for(phase);
        core.run.is_running = false;
        let snapshot = core.run.clone();
        drop(core);

        emit(
            &self.shared,
            SessionEvent::PhaseChanged {
                phase,
                auto_start_pending: false,
            },
        );
        snapshot
    }

    /// Validates, persists, and applies new settings. A running countdown is
    /// never interrupted; a stopped one reloads its remaining time from the
    /// new duration.
    pub async fn update_settings(&self, settings: AppSettings) -> Result<(), EngineError> {
        settings.validate().map_err(EngineError::InvalidSettings)?;
        self.settings_store.save(&settings)?;

        let mut core = self.shared.core.lock().await;
        core.settings = settings;
        if !core.run.is_running {
            core.run.seconds_remaining = core.settings.timer_settings.duration_for(core.run.phase);
        }
        info!("settings saved");
        Ok(())
    }

    /// Shell hook for the surface becoming visible again; replays a deferred
    /// completion cue.
    pub fn visibility_restored(&self) {
        self.shared.gateway.flush_deferred();
    }

    /// Shell hook for user gestures that are not timer controls (settings
    /// clicks and the like).
    pub fn user_gesture(&self) {
        self.shared.gateway.unlock_audio();
    }
}

fn emit(shared: &Shared, event: SessionEvent) {
    let _ = shared.events.send(event);
}

fn abort_ticker(shared: &Shared) {
    let Ok(mut ticker) = shared.ticker.lock() else {
        return;
    };
    if let Some(stale) = ticker.take() {
        stale.abort();
    }
}

/// One ticker per session: a new spawn always aborts the stale handle first
/// so no two countdowns ever run concurrently.
fn spawn_ticker(shared: &Arc<Shared>) {
    let Ok(mut ticker) = shared.ticker.lock() else {
        return;
    };
    if let Some(stale) = ticker.take() {
        stale.abort();
    }

    let task_shared = Arc::clone(shared);
    *ticker = Some(tokio::spawn(async move {
        let period = Duration::from_secs(1);
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        loop {
            interval.tick().await;

            let (outcome, snapshot) = {
                let mut core = task_shared.core.lock().await;
                let outcome = countdown::tick(&mut core.run);
                (outcome, core.run.clone())
            };

            match outcome {
                TickOutcome::Idle => break,
                TickOutcome::Ticked => emit(
                    &task_shared,
                    SessionEvent::Tick {
                        phase: snapshot.phase,
                        seconds_remaining: snapshot.seconds_remaining,
                    },
                ),
                TickOutcome::Completed => {
                    handle_completion(&task_shared, snapshot.phase).await;
                    break;
                }
            }
        }
    }));
}

async fn handle_completion(shared: &Arc<Shared>, completed: Phase) {
    shared.gateway.notify_phase_complete(completed);
    shared.auto_advance.note_stopped();

    let (next_phase, auto_start, pause_music, resume_music) = {
        let mut core = shared.core.lock().await;
        let advanced = sequencer::advance(
            completed,
            core.run.completed_work_phases,
            core.settings.timer_settings.long_break_interval,
        );
        core.run.completed_work_phases = advanced.completed_work_phases;
        core.run.phase = advanced.next_phase;
        core.run.seconds_remaining = core
            .settings
            .timer_settings
            .duration_for(advanced.next_phase);
        core.run.is_running = false;

        let timer = &core.settings.timer_settings;
        (
            advanced.next_phase,
            AutoAdvanceController::policy_allows(timer, advanced.next_phase),
            advanced.next_phase.is_break() && timer.auto_pause_on_break,
            advanced.next_phase == Phase::Focus && timer.auto_play_on_focus,
        )
    };

    emit(shared, SessionEvent::PhaseCompleted { phase: completed });

    let pending = shared.auto_advance.note_completion(next_phase, auto_start);
    emit(
        shared,
        SessionEvent::PhaseChanged {
            phase: next_phase,
            auto_start_pending: pending,
        },
    );

    if pending {
        schedule_auto_start(shared);
    }

    // Music automation rides along but never disturbs the timer: failures
    // are logged and dropped.
    if let Some(music) = shared.music.clone() {
        if pause_music {
            tokio::spawn(async move {
                if let Err(error) = music.pause_playback().await {
                    warn!("auto-pause of playback failed: {error}");
                }
            });
        } else if resume_music {
            tokio::spawn(async move {
                if let Err(error) = music.resume_playback().await {
                    warn!("auto-resume of playback failed: {error}");
                }
            });
        }
    }
}

fn schedule_auto_start(shared: &Arc<Shared>) {
    let task_shared = Arc::clone(shared);
    let grace = shared.auto_advance.grace_delay();
    let task = tokio::spawn(async move {
        time::sleep(grace).await;

        let Some(phase) = task_shared.auto_advance.try_fire() else {
            return;
        };

        {
            let mut core = task_shared.core.lock().await;
            if core.run.phase != phase || core.run.is_running {
                // The user intervened between fire and lock; leave their
                // state alone.
                task_shared.auto_advance.note_stopped();
                return;
            }
            let core = &mut *core;
            countdown::arm(&mut core.run, &core.settings.timer_settings);
        }

        spawn_ticker(&task_shared);
        emit(&task_shared, SessionEvent::AutoStartFired { phase });
    });
    shared.auto_advance.attach_task(task);
}
