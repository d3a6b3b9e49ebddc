use crate::domain::models::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub next_phase: Phase,
    pub completed_work_phases: u32,
}

/// Decides the phase that follows a completed one. Completing a focus phase
/// bumps the work counter and takes the long break on every
/// `long_break_interval`-th completion; completing any break always returns
/// to focus with the counter untouched.
pub fn advance(completed: Phase, completed_work_phases: u32, long_break_interval: u32) -> Advance {
    match completed {
        Phase::Focus => {
            let counter = completed_work_phases.saturating_add(1);
            let take_long_break = long_break_interval > 0 && counter % long_break_interval == 0;
            Advance {
                next_phase: if take_long_break {
                    Phase::LongBreak
                } else {
                    Phase::ShortBreak
                },
                completed_work_phases: counter,
            }
        }
        Phase::ShortBreak | Phase::LongBreak => Advance {
            next_phase: Phase::Focus,
            completed_work_phases,
        },
    }
}
