pub mod audio;
pub mod events;
pub mod session;

pub use events::{ClientMessage, ServerMessage};
pub use session::{SessionConfig, SessionConfigurator};
