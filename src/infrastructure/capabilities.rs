use crate::infrastructure::error::EngineError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Short audio cue playback. Browsers and most desktop audio stacks refuse
/// to emit sound until a user gesture has happened, so the player carries an
/// explicit `uninitialized -> unlocked` lifecycle: `unlock` is invoked on
/// user gestures (idempotent), and `play_cue` before unlock is a silent
/// no-op rather than an error.
pub trait CuePlayer: Send + Sync {
    fn unlock(&self) -> bool;
    fn is_unlocked(&self) -> bool;
    fn play_cue(&self);
}

/// System-notification capability. Permission is requested once per process;
/// `show` failures are the caller's to log and swallow.
pub trait AlertChannel: Send + Sync {
    fn request_permission(&self) -> bool;
    fn has_permission(&self) -> bool;
    fn show(&self, title: &str, body: &str) -> Result<(), EngineError>;
}

/// Whether the hosting surface is currently visible to the user.
pub trait VisibilityProbe: Send + Sync {
    fn is_visible(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryCuePlayer {
    unlocked: AtomicBool,
    cues_played: AtomicUsize,
    cues_dropped: AtomicUsize,
}

impl InMemoryCuePlayer {
    pub fn cues_played(&self) -> usize {
        self.cues_played.load(Ordering::SeqCst)
    }

    pub fn cues_dropped(&self) -> usize {
        self.cues_dropped.load(Ordering::SeqCst)
    }
}

impl CuePlayer for InMemoryCuePlayer {
    fn unlock(&self) -> bool {
        self.unlocked.store(true, Ordering::SeqCst);
        true
    }

    fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    fn play_cue(&self) {
        if self.is_unlocked() {
            self.cues_played.fetch_add(1, Ordering::SeqCst);
        } else {
            self.cues_dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
pub struct InMemoryAlertChannel {
    permission: AtomicBool,
    grant_on_request: bool,
    fail_shows: AtomicBool,
    shown: Mutex<Vec<(String, String)>>,
}

impl Default for InMemoryAlertChannel {
    fn default() -> Self {
        Self::granting(true)
    }
}

impl InMemoryAlertChannel {
    pub fn granting(grant_on_request: bool) -> Self {
        Self {
            permission: AtomicBool::new(false),
            grant_on_request,
            fail_shows: AtomicBool::new(false),
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_shows(&self, fail: bool) {
        self.fail_shows.store(fail, Ordering::SeqCst);
    }

    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl AlertChannel for InMemoryAlertChannel {
    fn request_permission(&self) -> bool {
        if self.grant_on_request {
            self.permission.store(true, Ordering::SeqCst);
        }
        self.grant_on_request
    }

    fn has_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn show(&self, title: &str, body: &str) -> Result<(), EngineError> {
        if self.fail_shows.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("alert channel unavailable".to_string()));
        }
        if let Ok(mut guard) = self.shown.lock() {
            guard.push((title.to_string(), body.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FixedVisibilityProbe {
    visible: AtomicBool,
}

impl FixedVisibilityProbe {
    pub fn new(visible: bool) -> Self {
        Self {
            visible: AtomicBool::new(visible),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }
}

impl Default for FixedVisibilityProbe {
    fn default() -> Self {
        Self::new(true)
    }
}

impl VisibilityProbe for FixedVisibilityProbe {
    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "audio")]
pub use rodio_cue::RodioCuePlayer;

#[cfg(feature = "audio")]
mod rodio_cue {
    use super::CuePlayer;
    use log::warn;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Sender};
    use std::sync::Mutex;
    use std::thread;

    enum CueCommand {
        Play,
    }

    /// Plays the bundled completion chime through the default output device.
    /// The rodio output stream is not `Send`, so a dedicated thread owns it
    /// and the handle only passes commands across a channel; the thread is
    /// spawned lazily on the first `unlock`, which is the user-gesture hook.
    pub struct RodioCuePlayer {
        tx: Mutex<Option<Sender<CueCommand>>>,
        unlocked: AtomicBool,
        cue_bytes: &'static [u8],
    }

    impl RodioCuePlayer {
        pub fn new(cue_bytes: &'static [u8]) -> Self {
            Self {
                tx: Mutex::new(None),
                unlocked: AtomicBool::new(false),
                cue_bytes,
            }
        }

        fn ensure_thread(&self) -> Option<Sender<CueCommand>> {
            let mut guard = self.tx.lock().ok()?;
            if let Some(tx) = guard.as_ref() {
                return Some(tx.clone());
            }

            let (tx, rx) = mpsc::channel::<CueCommand>();
            let cue_bytes = self.cue_bytes;
            let spawned = thread::Builder::new()
                .name("cue-player".to_string())
                .spawn(move || {
                    let Ok((_stream, handle)) = rodio::OutputStream::try_default() else {
                        warn!("no audio output device; cues disabled");
                        return;
                    };
                    while let Ok(CueCommand::Play) = rx.recv() {
                        let cursor = std::io::Cursor::new(cue_bytes);
                        let source = match rodio::Decoder::new(cursor) {
                            Ok(source) => source,
                            Err(error) => {
                                warn!("cue asset undecodable: {error}");
                                continue;
                            }
                        };
                        match rodio::Sink::try_new(&handle) {
                            Ok(sink) => {
                                sink.append(source);
                                sink.detach();
                            }
                            Err(error) => warn!("failed to play cue: {error}"),
                        }
                    }
                });
            if spawned.is_err() {
                return None;
            }

            let cloned = tx.clone();
            *guard = Some(tx);
            Some(cloned)
        }
    }

    impl CuePlayer for RodioCuePlayer {
        fn unlock(&self) -> bool {
            let usable = self.ensure_thread().is_some();
            if usable {
                self.unlocked.store(true, Ordering::SeqCst);
            }
            usable
        }

        fn is_unlocked(&self) -> bool {
            self.unlocked.load(Ordering::SeqCst)
        }

        fn play_cue(&self) {
            if !self.is_unlocked() {
                return;
            }
            if let Some(tx) = self.ensure_thread() {
                let _ = tx.send(CueCommand::Play);
            }
        }
    }
}
