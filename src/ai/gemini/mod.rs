//! Gemini Live API session backend.
//!
//! Implements the [`AiSessionClient`](crate::ai::AiSessionClient) trait over
//! Google's WebSocket-based BidiGenerateContent API.

mod client;
mod config;
mod messages;

pub use client::GeminiLiveClient;
pub use config::{DEFAULT_GEMINI_MODEL, GEMINI_INPUT_MIME_TYPE, GEMINI_LIVE_URL, GeminiVoice};
