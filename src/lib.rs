//! Voicebridge - PBX call gateway for the Gemini Live conversational API.
//!
//! Turns an incoming telephone call into a live, turn-taking conversation
//! with a streaming AI backend: the [`session`] module owns call lifecycles,
//! [`audio`] converts between narrow-band G.711 telephony frames and the
//! backend's wide-band PCM, [`ai`] frames the Gemini Live protocol, and
//! [`tools`] dispatches mid-conversation function calls.

pub mod ai;
pub mod audio;
pub mod config;
pub mod session;
pub mod telephony;
pub mod tools;

// Re-export commonly used items for convenience
pub use ai::{AiError, AiSessionClient, GeminiLiveClient, SessionEvent};
pub use audio::{AudioEncoding, AudioFormat, AudioFrame, FrameConverter};
pub use config::GatewayConfig;
pub use session::{CallId, CallSession, CallState, SessionConfig, SessionRegistry};
pub use tools::{ToolDispatcher, ToolDispatcherBuilder};
