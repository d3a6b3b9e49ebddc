pub mod auth;
pub mod auto_advance;
pub mod countdown;
pub mod notifications;
pub mod playback;
pub mod sequencer;
pub mod session;
