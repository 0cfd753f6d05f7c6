//! Gemini Live API WebSocket message types.
//!
//! All messages are JSON-encoded. Each direction uses a single-key envelope:
//! the key names the message kind, the value carries its payload.
//!
//! Client messages (sent to server):
//! - setup - Open the session: model, generation config, persona, tools
//! - realtimeInput - Append streamed input audio chunks
//! - toolResponse - Return results for issued function calls
//! - clientContent - Inject a structured conversation turn (text)
//!
//! Server messages (received from server):
//! - setupComplete - Setup accepted, streaming may begin
//! - serverContent - Model output: audio/text parts, interruption, turn end
//! - toolCall - The model requests function invocations
//! - toolCallCancellation - Previously issued calls are withdrawn
//! - goAway - The server is about to close the connection

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{ToolDeclaration, ToolOutcome, ToolResult};

use super::config::GEMINI_INPUT_MIME_TYPE;

// =============================================================================
// Client Messages
// =============================================================================

/// Envelope for messages sent to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session setup, must be the first message on the socket
    Setup(SetupConfig),
    /// Streamed realtime media input
    RealtimeInput(RealtimeInput),
    /// Results for previously issued tool calls
    ToolResponse(ToolResponse),
    /// A structured conversation turn
    ClientContent(ClientContent),
}

/// Session setup payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    /// Qualified model name (`models/<name>`)
    pub model: String,

    /// Generation configuration
    pub generation_config: GenerationConfig,

    /// System instruction / persona
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    /// Tool declarations available to the model
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

/// Generation configuration within setup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Output modalities; this gateway always requests `["AUDIO"]`
    pub response_modalities: Vec<String>,

    /// Speech synthesis configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// Voice selection
    pub voice_config: VoiceConfig,
}

/// Voice selection wrapper.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Prebuilt voice selection
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

/// Prebuilt voice selection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    /// Voice name (e.g. "Puck")
    pub voice_name: String,
}

/// One group of function declarations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Declared functions
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// A single declared function.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    /// Function name
    pub name: String,
    /// Function description
    pub description: String,
    /// JSON-schema parameters object
    pub parameters: Value,
}

impl From<&ToolDeclaration> for FunctionDeclaration {
    fn from(decl: &ToolDeclaration) -> Self {
        Self {
            name: decl.name.clone(),
            description: decl.description.clone(),
            parameters: decl.parameters.clone(),
        }
    }
}

/// Streamed media input payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Media chunks, in stream order
    pub media_chunks: Vec<MediaChunk>,
}

/// One base64-encoded media chunk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    /// MIME type including the sample rate
    pub mime_type: String,
    /// Base64-encoded sample payload
    pub data: String,
}

impl RealtimeInput {
    /// Build an input audio chunk from raw 16 kHz PCM16 bytes.
    pub fn audio(pcm: &[u8]) -> Self {
        Self {
            media_chunks: vec![MediaChunk {
                mime_type: GEMINI_INPUT_MIME_TYPE.to_string(),
                data: BASE64_STANDARD.encode(pcm),
            }],
        }
    }
}

/// Tool results payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// Results correlated by call id
    pub function_responses: Vec<FunctionResponse>,
}

/// One correlated function result.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    /// Call id from the originating toolCall message
    pub id: String,
    /// Function name, echoed back
    pub name: String,
    /// Structured result object
    pub response: Value,
}

impl From<&ToolResult> for FunctionResponse {
    fn from(result: &ToolResult) -> Self {
        let response = match &result.outcome {
            ToolOutcome::Ok(value) => serde_json::json!({ "result": value }),
            ToolOutcome::Err(reason) => serde_json::json!({ "error": reason }),
        };
        Self {
            id: result.call_id.clone(),
            name: result.name.clone(),
            response,
        }
    }
}

/// A structured conversation turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    /// Conversation turns to append
    pub turns: Vec<Content>,
    /// Whether the model should respond now
    pub turn_complete: bool,
}

impl ClientContent {
    /// Build a completed user text turn.
    pub fn user_text(text: &str) -> Self {
        Self {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        }
    }
}

/// A content block: an ordered list of parts with an optional role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// Role (user, model)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Ordered parts
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One part of a content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline binary content (base64)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

/// Base64-encoded inline binary content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// MIME type, e.g. `audio/pcm;rate=24000`
    pub mime_type: String,
    /// Base64-encoded payload
    pub data: String,
}

// =============================================================================
// Server Messages
// =============================================================================

/// Envelope for messages received from the server.
///
/// Deserialized as a struct of optionals rather than an enum: the server is
/// free to add envelope keys, and unknown ones must not fail the session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    /// Setup was accepted
    pub setup_complete: Option<SetupComplete>,
    /// Model output
    pub server_content: Option<ServerContent>,
    /// Function call request
    pub tool_call: Option<ToolCallMessage>,
    /// Withdrawal of previously issued calls
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    /// Imminent server-side close
    pub go_away: Option<GoAway>,
}

/// Setup acknowledgement. Carries no fields today.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupComplete {}

/// Model output payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    /// The model's in-progress turn
    pub model_turn: Option<Content>,
    /// The user barged in; queued output for this turn is stale
    pub interrupted: Option<bool>,
    /// The model finished its turn
    pub turn_complete: Option<bool>,
}

/// Function call request payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCallMessage {
    /// Requested invocations
    pub function_calls: Vec<FunctionCallPayload>,
}

/// One requested function invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCallPayload {
    /// Correlation id, echoed back in the response
    #[serde(default)]
    pub id: String,
    /// Function name
    pub name: String,
    /// Named arguments
    #[serde(default)]
    pub args: Value,
}

/// Withdrawal of previously issued function calls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCallCancellation {
    /// Ids of the withdrawn calls
    pub ids: Vec<String>,
}

/// Server-side close announcement.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoAway {
    /// Time left before the connection is closed, as an API duration string
    pub time_left: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
