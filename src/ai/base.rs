//! Base types for streaming conversational-AI backends.
//!
//! A backend presents one logical conversation as a single ordered event
//! stream plus a single ordered send sink, hiding the wire protocol. The
//! bridge consumes the stream, pumps audio into the sink, and answers tool
//! calls through the same sink.
//!
//! # Audio Format
//!
//! Input audio is PCM 16-bit signed little-endian at 16 kHz; output audio
//! arrives at 24 kHz in the same encoding.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::AudioFrame;
use crate::tools::{ToolCall, ToolDeclaration, ToolResult};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on the AI session boundary.
#[derive(Debug, Error)]
pub enum AiError {
    /// Connection to the backend failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Session setup did not complete within the bounded timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The outbound send queue is full (backpressure)
    #[error("Send queue full")]
    QueueFull,

    /// Backend-reported session error
    #[error("Session error: {0}")]
    SessionError(String),
}

/// Result type for AI session operations.
pub type AiResult<T> = Result<T, AiError>;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one AI conversation session.
#[derive(Debug, Clone)]
pub struct AiSessionConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name for speech output
    pub voice: Option<String>,

    /// System instruction / persona text
    pub system_instruction: Option<String>,

    /// Tools advertised to the model at setup
    pub tools: Vec<ToolDeclaration>,

    /// Bound on connection establishment plus setup handshake
    pub connect_timeout: Duration,

    /// Capacity of the outbound send queue
    pub send_queue_capacity: usize,
}

impl Default for AiSessionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            voice: None,
            system_instruction: None,
            tools: Vec::new(),
            connect_timeout: Duration::from_secs(5),
            send_queue_capacity: 256,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Events delivered by the backend, in session order.
#[derive(Debug)]
pub enum SessionEvent {
    /// A chunk of synthesized output audio (24 kHz PCM16)
    Audio(AudioFrame),

    /// Model text output (diagnostic; the conversation itself is audio)
    Text(String),

    /// The model requests a tool invocation
    ToolCall(ToolCall),

    /// The backend withdrew previously issued tool calls
    ToolCallCancelled { ids: Vec<String> },

    /// The caller started speaking while output was still playing;
    /// queued output for the current turn must be discarded
    Interrupted,

    /// The model finished its turn
    TurnComplete,

    /// The session ended; connection loss surfaces here, never as a panic
    Closed { reason: Option<String> },
}

/// Receiving half of a session's ordered event stream.
pub type SessionEvents = mpsc::Receiver<SessionEvent>;

// =============================================================================
// Session Traits
// =============================================================================

/// Ordered send sink of one live session.
///
/// All sends are non-blocking from the caller's perspective: they enqueue
/// onto a bounded channel and actual transmission is asynchronous. Wire order
/// matches enqueue order.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Enqueue an outbound audio frame (16 kHz PCM16).
    ///
    /// Returns [`AiError::QueueFull`] instead of waiting when the backend is
    /// not keeping up; the caller applies its drop policy.
    fn send_audio(&self, frame: AudioFrame) -> AiResult<()>;

    /// Send a user text turn into the conversation.
    async fn send_text(&self, text: &str) -> AiResult<()>;

    /// Send a correlated result for a prior tool call.
    ///
    /// The backend will not continue generating output for that call until
    /// the result arrives.
    async fn send_tool_result(&self, result: ToolResult) -> AiResult<()>;

    /// Close the session. Idempotent.
    async fn close(&self);
}

/// Boxed session sink.
pub type BoxedSessionSink = Box<dyn SessionSink>;

/// Factory for live AI sessions.
///
/// One `connect` call yields one conversation: a send sink and the ordered
/// event stream. Reconnection after loss is the caller's decision; this
/// layer reports loss as [`SessionEvent::Closed`] and stops.
#[async_trait]
pub trait AiSessionClient: Send + Sync {
    /// Establish a streaming session with the configured persona and tools.
    async fn connect(&self, config: &AiSessionConfig)
    -> AiResult<(BoxedSessionSink, SessionEvents)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AiSessionConfig::default();
        assert!(config.api_key.is_empty());
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.send_queue_capacity, 256);
        assert!(config.tools.is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = AiError::ConnectionFailed("dns".to_string());
        assert!(err.to_string().contains("Connection failed"));
        assert_eq!(AiError::NotConnected.to_string(), "Not connected");
        assert_eq!(AiError::QueueFull.to_string(), "Send queue full");
    }
}
