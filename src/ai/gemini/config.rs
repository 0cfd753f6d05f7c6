//! Gemini Live API configuration types.
//!
//! This module contains configuration for Google's Gemini Live API:
//! - WebSocket endpoint constants
//! - Model selection
//! - Voice selection
//! - Audio format constants

use serde::{Deserialize, Serialize};

/// Gemini Live API WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Host header value for the Gemini Live endpoint.
pub const GEMINI_LIVE_HOST: &str = "generativelanguage.googleapis.com";

/// Default Gemini Live model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";

/// MIME type attached to every input audio chunk.
pub const GEMINI_INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

// =============================================================================
// Voices
// =============================================================================

/// Prebuilt voices available for Gemini Live speech output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeminiVoice {
    /// Puck voice (default)
    #[default]
    Puck,
    /// Charon voice
    Charon,
    /// Kore voice
    Kore,
    /// Fenrir voice
    Fenrir,
    /// Aoede voice
    Aoede,
}

impl GeminiVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "puck" => Self::Puck,
            "charon" => Self::Charon,
            "kore" => Self::Kore,
            "fenrir" => Self::Fenrir,
            "aoede" => Self::Aoede,
            _ => Self::default(),
        }
    }

    /// Get all available voices.
    pub fn all() -> &'static [GeminiVoice] {
        &[
            Self::Puck,
            Self::Charon,
            Self::Kore,
            Self::Fenrir,
            Self::Aoede,
        ]
    }
}

impl std::fmt::Display for GeminiVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Qualify a bare model name the way the setup message expects.
///
/// The API wants `models/<name>`; configuration usually carries the bare name.
pub fn qualified_model_name(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}
