use crate::domain::models::{Phase, TimerSettings};
use log::debug;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default pause between a completion notification and an auto-started next
/// countdown, long enough for the cue to register.
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAdvanceState {
    Idle,
    Pending,
    Running,
}

#[derive(Debug, Default)]
struct Inner {
    pending_phase: Option<Phase>,
    running: bool,
    task: Option<JoinHandle<()>>,
}

/// Owns the start-the-next-phase-by-itself decision. Transitions:
/// Idle -> Pending on a completion whose policy is enabled,
/// Pending -> Running when the grace delay elapses uninterrupted,
/// Pending -> Idle on any manual phase change or stop before it elapses,
/// Running -> Idle when the countdown finishes or the user pauses.
pub struct AutoAdvanceController {
    inner: Mutex<Inner>,
    grace_delay: Duration,
}

impl Default for AutoAdvanceController {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_DELAY)
    }
}

impl AutoAdvanceController {
    pub fn new(grace_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            grace_delay,
        }
    }

    pub fn grace_delay(&self) -> Duration {
        self.grace_delay
    }

    /// Independent toggles: breaks and pomodoros auto-start separately.
    pub fn policy_allows(settings: &TimerSettings, next_phase: Phase) -> bool {
        if next_phase.is_break() {
            settings.auto_start_breaks
        } else {
            settings.auto_start_pomodoros
        }
    }

    pub fn state(&self) -> AutoAdvanceState {
        let Ok(inner) = self.inner.lock() else {
            return AutoAdvanceState::Idle;
        };
        if inner.pending_phase.is_some() {
            AutoAdvanceState::Pending
        } else if inner.running {
            AutoAdvanceState::Running
        } else {
            AutoAdvanceState::Idle
        }
    }

    /// Records a completion. Returns true when the applicable policy put the
    /// controller into `Pending`; the caller then schedules the grace task
    /// and hands its handle to `attach_task`.
    pub fn note_completion(&self, next_phase: Phase, policy_enabled: bool) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        Self::abort_task(&mut inner);
        inner.running = false;
        inner.pending_phase = policy_enabled.then_some(next_phase);
        inner.pending_phase.is_some()
    }

    pub fn attach_task(&self, task: JoinHandle<()>) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.pending_phase.is_some() {
                inner.task = Some(task);
            } else {
                // Cancelled between scheduling and attach.
                task.abort();
            }
        }
    }

    /// Consumes the pending start after the grace delay. `None` means the
    /// pending start was cancelled while the task slept.
    pub fn try_fire(&self) -> Option<Phase> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        let phase = inner.pending_phase.take()?;
        inner.task = None;
        inner.running = true;
        Some(phase)
    }

    /// Manual phase change or stop: drop any pending start.
    pub fn cancel_pending(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.pending_phase.take().is_some() {
            debug!("pending auto-start cancelled");
        }
        Self::abort_task(&mut inner);
    }

    /// Countdown finished or the user paused.
    pub fn note_stopped(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.running = false;
    }

    /// The user started the countdown by hand.
    pub fn note_manual_start(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.pending_phase = None;
        inner.running = true;
        Self::abort_task(&mut inner);
    }

    fn abort_task(inner: &mut Inner) {
        if let Some(task) = inner.task.take() {
            task.abort();
        }
    }
}
