pub mod audio;
pub mod breathing;
pub mod cue;
pub mod pattern;
pub mod reactor;
pub mod session;
pub mod settings;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use breathing::SessionState;
pub use pattern::{BreathingPattern, ConfigError, VoiceProfile, VoiceSelection};
pub use session::{SessionController, SessionError};
pub use types::BreathingPhase;
