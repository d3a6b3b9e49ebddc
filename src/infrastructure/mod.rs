pub mod capabilities;
pub mod error;
pub mod session_store;
pub mod settings_store;
pub mod spotify_client;
