pub mod auxiliary;
pub mod client;
pub mod codec;
pub mod config;
pub mod events;
pub mod gate;
pub mod playback;
pub mod session;
pub mod transcript;

pub use gemini_live_types as types;
pub use client::GeminiConnector;
pub use session::{
    ConnectionState, SessionBuilder, SessionError, SessionEvent, SessionEvents, SessionHandle,
    SessionManager,
};

#[cfg(feature = "utils")]
pub use gemini_live_utils as utils;
