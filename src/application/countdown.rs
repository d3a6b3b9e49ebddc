use crate::domain::models::{TimerRunState, TimerSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Timer is not running; the ticker should wind down.
    Idle,
    /// One second elapsed, more remain.
    Ticked,
    /// Remaining time crossed zero on this tick. Fired exactly once per
    /// crossing: the transition also stops the timer, so a re-entrant tick
    /// sees `Idle`.
    Completed,
}

/// One second of countdown. Remaining time never goes negative; a countdown
/// started at D produces exactly D `Ticked`/`Completed` decrements before
/// completion, and a zero-length phase completes on its first tick with no
/// decrement.
pub fn tick(state: &mut TimerRunState) -> TickOutcome {
    if !state.is_running {
        return TickOutcome::Idle;
    }
    if state.seconds_remaining == 0 {
        state.is_running = false;
        return TickOutcome::Completed;
    }

    state.seconds_remaining -= 1;
    if state.seconds_remaining == 0 {
        state.is_running = false;
        TickOutcome::Completed
    } else {
        TickOutcome::Ticked
    }
}

/// Arms the countdown for a start request. Starting with an elapsed timer
/// reloads the active phase's full duration first so completion does not
/// fire immediately; starting mid-phase resumes from the preserved value.
pub fn arm(state: &mut TimerRunState, settings: &TimerSettings) {
    if state.seconds_remaining == 0 {
        state.seconds_remaining = settings.duration_for(state.phase);
    }
    state.is_running = true;
}
