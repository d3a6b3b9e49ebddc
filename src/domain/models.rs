use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Focus,
    ShortBreak,
    LongBreak,
}

impl Phase {
    pub fn is_break(self) -> bool {
        matches!(self, Self::ShortBreak | Self::LongBreak)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::ShortBreak => "short_break",
            Self::LongBreak => "long_break",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Focus => "Focus",
            Self::ShortBreak => "Short Break",
            Self::LongBreak => "Long Break",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerSettings {
    pub work_duration: u32,
    pub short_break_duration: u32,
    pub long_break_duration: u32,
    pub auto_start_breaks: bool,
    pub auto_start_pomodoros: bool,
    pub long_break_interval: u32,
    pub spotify_enabled: bool,
    pub auto_pause_on_break: bool,
    pub auto_play_on_focus: bool,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_duration: 25 * 60,
            short_break_duration: 5 * 60,
            long_break_duration: 15 * 60,
            auto_start_breaks: false,
            auto_start_pomodoros: false,
            long_break_interval: 4,
            spotify_enabled: false,
            auto_pause_on_break: false,
            auto_play_on_focus: false,
        }
    }
}

impl TimerSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.long_break_interval == 0 {
            return Err("settings.longBreakInterval must be > 0".to_string());
        }
        Ok(())
    }

    /// Resolves a phase to its configured length in seconds. A zero duration
    /// is legal and completes on the next tick.
    pub fn duration_for(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Focus => self.work_duration,
            Phase::ShortBreak => self.short_break_duration,
            Phase::LongBreak => self.long_break_duration,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub timer_settings: TimerSettings,
    pub spotify_enabled: bool,
    pub notifications_enabled: bool,
    pub theme: Theme,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            timer_settings: TimerSettings::default(),
            spotify_enabled: false,
            notifications_enabled: true,
            theme: Theme::System,
        }
    }
}

impl AppSettings {
    pub fn validate(&self) -> Result<(), String> {
        self.timer_settings.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now && !self.access_token.trim().is_empty()
    }
}

/// Mutable per-session timer state. Owned exclusively by the session facade;
/// observers only ever see cloned snapshots.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerRunState {
    pub phase: Phase,
    pub seconds_remaining: u32,
    pub is_running: bool,
    pub completed_work_phases: u32,
}

impl TimerRunState {
    pub fn new(settings: &TimerSettings) -> Self {
        Self {
            phase: Phase::Focus,
            seconds_remaining: settings.duration_for(Phase::Focus),
            is_running: false,
            completed_work_phases: 0,
        }
    }

    /// MM:SS display form of the remaining time.
    pub fn format_remaining(&self) -> String {
        let minutes = self.seconds_remaining / 60;
        let seconds = self.seconds_remaining % 60;
        format!("{minutes}:{seconds:02}")
    }
}
