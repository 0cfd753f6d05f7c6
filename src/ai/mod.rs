//! Streaming conversational-AI session layer.
//!
//! One live telephone call maps to one AI session: a single ordered event
//! stream coming back from the model and a single ordered send sink going
//! toward it. The [`base`] module defines the provider-independent surface;
//! [`gemini`] implements it over the Gemini Live API.

mod base;
pub mod gemini;

pub use base::{
    AiError, AiResult, AiSessionClient, AiSessionConfig, BoxedSessionSink, SessionEvent,
    SessionEvents, SessionSink,
};
pub use gemini::GeminiLiveClient;
