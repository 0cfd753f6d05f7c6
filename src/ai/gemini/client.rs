//! Gemini Live API client implementation.
//!
//! This module provides the Gemini Live client that implements the
//! [`AiSessionClient`] trait using Google's WebSocket-based BidiGenerateContent
//! API.
//!
//! # API Reference
//!
//! - Endpoint: `wss://generativelanguage.googleapis.com/ws/...BidiGenerateContent?key=<key>`
//! - Protocol: WebSocket with JSON messages
//! - Input audio: PCM 16-bit, 16 kHz, mono, little-endian, base64 encoded
//! - Output audio: PCM 16-bit, 24 kHz, mono, little-endian, base64 encoded
//!
//! # Session Shape
//!
//! `connect` performs the socket handshake, sends the `setup` message and
//! waits for `setupComplete`, all within the configured timeout. It then
//! hands back a send sink and the ordered event stream; a spawned pump task
//! owns the socket for the rest of the session. Connection loss is reported
//! as a final [`SessionEvent::Closed`] and the task ends; recovery is the
//! caller's decision.

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::config::{DEFAULT_GEMINI_MODEL, GEMINI_LIVE_HOST, GEMINI_LIVE_URL, qualified_model_name};
use super::messages::{
    ClientContent, ClientMessage, Content, FunctionResponse, GenerationConfig, Part,
    PrebuiltVoiceConfig, RealtimeInput, ServerMessage, SetupConfig, SpeechConfig, ToolResponse,
    ToolSpec, VoiceConfig,
};
use crate::ai::base::{
    AiError, AiResult, AiSessionClient, AiSessionConfig, BoxedSessionSink, SessionEvent,
    SessionEvents, SessionSink,
};
use crate::audio::{AudioFormat, AudioFrame};
use crate::tools::{ToolCall, ToolResult};

/// Channel capacity for the inbound event stream.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// =============================================================================
// Gemini Live Client
// =============================================================================

/// Gemini Live API client.
///
/// Stateless connection factory; each [`connect`](AiSessionClient::connect)
/// call opens an independent session.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiLiveClient;

impl GeminiLiveClient {
    /// Build the WebSocket URL with the API key as a query parameter.
    fn build_ws_url(api_key: &str) -> String {
        format!("{GEMINI_LIVE_URL}?key={api_key}")
    }

    /// Build the WebSocket upgrade request.
    fn build_request(api_key: &str) -> AiResult<http::Request<()>> {
        http::Request::builder()
            .uri(Self::build_ws_url(api_key))
            .header("Host", GEMINI_LIVE_HOST)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| AiError::ConnectionFailed(e.to_string()))
    }

    /// Build the initial setup message from the session config.
    fn build_setup(config: &AiSessionConfig) -> ClientMessage {
        let model = if config.model.is_empty() {
            DEFAULT_GEMINI_MODEL.to_string()
        } else {
            config.model.clone()
        };

        let tools = if config.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolSpec {
                function_declarations: config.tools.iter().map(Into::into).collect(),
            }]
        };

        ClientMessage::Setup(SetupConfig {
            model: qualified_model_name(&model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: config.voice.as_ref().map(|voice| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: config.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: Some(text.clone()),
                    inline_data: None,
                }],
            }),
            tools,
        })
    }

    /// Connect, send setup and wait for `setupComplete`.
    async fn establish(config: &AiSessionConfig) -> AiResult<(WsSink, WsStream)> {
        let request = Self::build_request(&config.api_key)?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_connect_error)?;

        tracing::info!(model = %config.model, "Connected to Gemini Live API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let setup = Self::build_setup(config);
        let json = serde_json::to_string(&setup)
            .map_err(|e| AiError::SerializationError(e.to_string()))?;
        ws_sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| AiError::WebSocketError(e.to_string()))?;

        // The session is not usable until the server acknowledges setup.
        loop {
            let msg = ws_stream
                .next()
                .await
                .ok_or_else(|| AiError::ConnectionFailed("closed during setup".to_string()))?
                .map_err(|e| AiError::WebSocketError(e.to_string()))?;

            match msg {
                Message::Text(text) => {
                    if parse_server_message(text.as_bytes())
                        .is_some_and(|m| m.setup_complete.is_some())
                    {
                        break;
                    }
                }
                Message::Binary(data) => {
                    if parse_server_message(&data).is_some_and(|m| m.setup_complete.is_some()) {
                        break;
                    }
                }
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed during setup".to_string());
                    return Err(AiError::ConnectionFailed(reason));
                }
                _ => {}
            }
        }

        tracing::debug!("Gemini Live setup complete");
        Ok((ws_sink, ws_stream))
    }
}

#[async_trait]
impl AiSessionClient for GeminiLiveClient {
    async fn connect(
        &self,
        config: &AiSessionConfig,
    ) -> AiResult<(BoxedSessionSink, SessionEvents)> {
        if config.api_key.is_empty() {
            return Err(AiError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        // Handshake plus setup acknowledgement share one deadline.
        let (ws_sink, ws_stream) =
            tokio::time::timeout(config.connect_timeout, Self::establish(config))
                .await
                .map_err(|_| {
                    AiError::Timeout(format!(
                        "session setup did not complete within {:?}",
                        config.connect_timeout
                    ))
                })??;

        let (out_tx, out_rx) = mpsc::channel::<Outbound>(config.send_queue_capacity);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(run_session(ws_sink, ws_stream, out_rx, event_tx));

        let sink = GeminiSessionSink { out_tx };
        Ok((Box::new(sink), event_rx))
    }
}

/// Map a tungstenite connect error onto the session error taxonomy.
fn map_connect_error(err: tungstenite::Error) -> AiError {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            AiError::AuthenticationFailed(format!("HTTP {}", response.status()))
        }
        other => AiError::ConnectionFailed(other.to_string()),
    }
}

// =============================================================================
// Session Pump
// =============================================================================

/// Outbound items queued behind the sink.
enum Outbound {
    Message(ClientMessage),
    Close,
}

/// Socket pump for one session.
///
/// Owns both socket halves. Ends when either side closes or the sink asks
/// for shutdown, always emitting exactly one final [`SessionEvent::Closed`].
async fn run_session(
    mut ws_sink: WsSink,
    mut ws_stream: WsStream,
    mut out_rx: mpsc::Receiver<Outbound>,
    event_tx: mpsc::Sender<SessionEvent>,
) {
    let mut audio_seq: u64 = 0;
    let mut close_reason: Option<String> = None;

    'pump: loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(Outbound::Message(msg)) => {
                        let json = match serde_json::to_string(&msg) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize client message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            close_reason = Some(e.to_string());
                            break;
                        }
                    }
                    // Sink dropped or explicitly closed: say goodbye and stop.
                    Some(Outbound::Close) | None => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(server_msg) = parse_server_message(text.as_bytes()) {
                            for event in translate(server_msg, &mut audio_seq) {
                                if event_tx.send(event).await.is_err() {
                                    break 'pump;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Some(server_msg) = parse_server_message(&data) {
                            for event in translate(server_msg, &mut audio_seq) {
                                if event_tx.send(event).await.is_err() {
                                    break 'pump;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            close_reason = Some(e.to_string());
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Gemini Live closed the connection");
                        close_reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        close_reason = Some(e.to_string());
                        break;
                    }
                    Some(Ok(_)) => {}
                    None => {
                        close_reason = Some("connection lost".to_string());
                        break;
                    }
                }
            }
        }
    }

    let _ = event_tx
        .send(SessionEvent::Closed {
            reason: close_reason,
        })
        .await;
    tracing::debug!("Gemini Live session task ended");
}

/// Parse one wire message, logging and discarding malformed payloads.
fn parse_server_message(raw: &[u8]) -> Option<ServerMessage> {
    match serde_json::from_slice::<ServerMessage>(raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!("Failed to parse server message: {}", e);
            None
        }
    }
}

/// Translate one server message into session events, preserving wire order.
fn translate(msg: ServerMessage, audio_seq: &mut u64) -> Vec<SessionEvent> {
    let mut events = Vec::new();

    if let Some(content) = msg.server_content {
        // Interruption outranks any audio bundled in the same message.
        if content.interrupted == Some(true) {
            tracing::debug!("Model output interrupted by caller speech");
            events.push(SessionEvent::Interrupted);
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    match BASE64_STANDARD.decode(&inline.data) {
                        Ok(pcm) => {
                            let frame = AudioFrame::new(
                                Bytes::from(pcm),
                                AudioFormat::ai_output(),
                                *audio_seq,
                            );
                            *audio_seq += 1;
                            events.push(SessionEvent::Audio(frame));
                        }
                        Err(e) => {
                            tracing::warn!("Failed to decode audio chunk: {}", e);
                        }
                    }
                }
                if let Some(text) = part.text {
                    events.push(SessionEvent::Text(text));
                }
            }
        }

        if content.turn_complete == Some(true) {
            events.push(SessionEvent::TurnComplete);
        }
    }

    if let Some(tool_call) = msg.tool_call {
        for call in tool_call.function_calls {
            events.push(SessionEvent::ToolCall(ToolCall {
                id: call.id,
                name: call.name,
                args: value_to_args(call.args),
            }));
        }
    }

    if let Some(cancellation) = msg.tool_call_cancellation {
        events.push(SessionEvent::ToolCallCancelled {
            ids: cancellation.ids,
        });
    }

    if let Some(go_away) = msg.go_away {
        tracing::warn!(time_left = ?go_away.time_left, "Server announced imminent close");
    }

    events
}

/// Coerce a function-call `args` value into a named-argument map.
fn value_to_args(args: Value) -> Map<String, Value> {
    match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            tracing::warn!("Non-object tool arguments: {}", other);
            Map::new()
        }
    }
}

// =============================================================================
// Session Sink
// =============================================================================

/// Send half of a live Gemini session.
struct GeminiSessionSink {
    out_tx: mpsc::Sender<Outbound>,
}

#[async_trait]
impl SessionSink for GeminiSessionSink {
    fn send_audio(&self, frame: AudioFrame) -> AiResult<()> {
        let expected = AudioFormat::ai_input();
        if frame.format != expected {
            return Err(AiError::InvalidConfiguration(format!(
                "input audio must be {} Hz {}, got {} Hz {}",
                expected.sample_rate, expected.encoding, frame.format.sample_rate,
                frame.format.encoding,
            )));
        }

        let msg = ClientMessage::RealtimeInput(RealtimeInput::audio(&frame.payload));
        self.out_tx
            .try_send(Outbound::Message(msg))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => AiError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => AiError::NotConnected,
            })
    }

    async fn send_text(&self, text: &str) -> AiResult<()> {
        let msg = ClientMessage::ClientContent(ClientContent::user_text(text));
        self.out_tx
            .send(Outbound::Message(msg))
            .await
            .map_err(|_| AiError::NotConnected)
    }

    async fn send_tool_result(&self, result: ToolResult) -> AiResult<()> {
        let msg = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse::from(&result)],
        });
        self.out_tx
            .send(Outbound::Message(msg))
            .await
            .map_err(|_| AiError::NotConnected)
    }

    async fn close(&self) {
        let _ = self.out_tx.send(Outbound::Close).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDeclaration;

    fn config_with_key() -> AiSessionConfig {
        AiSessionConfig {
            api_key: "test-key".to_string(),
            model: "gemini-2.0-flash-exp".to_string(),
            voice: Some("Puck".to_string()),
            system_instruction: Some("Be brief.".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_requires_api_key() {
        let client = GeminiLiveClient;
        let result = client.connect(&AiSessionConfig::default()).await;
        match result {
            Err(AiError::AuthenticationFailed(_)) => {}
            Err(other) => panic!("expected AuthenticationFailed, got {other:?}"),
            Ok(_) => panic!("expected AuthenticationFailed, got Ok(..)"),
        }
    }

    #[test]
    fn test_build_ws_url_carries_key() {
        let url = GeminiLiveClient::build_ws_url("abc123");
        assert!(url.starts_with("wss://generativelanguage.googleapis.com"));
        assert!(url.ends_with("?key=abc123"));
    }

    #[test]
    fn test_setup_includes_persona_and_tools() {
        let mut config = config_with_key();
        config.tools = vec![ToolDeclaration {
            name: "get_service_status".to_string(),
            description: "Service health.".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }];

        let setup = GeminiLiveClient::build_setup(&config);
        let json: Value = serde_json::to_value(&setup).unwrap();
        assert_eq!(json["setup"]["model"], "models/gemini-2.0-flash-exp");
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be brief."
        );
        assert_eq!(
            json["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            "get_service_status"
        );
    }

    #[test]
    fn test_setup_defaults_model_when_empty() {
        let mut config = config_with_key();
        config.model = String::new();
        let setup = GeminiLiveClient::build_setup(&config);
        let json: Value = serde_json::to_value(&setup).unwrap();
        assert_eq!(
            json["setup"]["model"],
            format!("models/{DEFAULT_GEMINI_MODEL}")
        );
    }

    #[test]
    fn test_translate_orders_interrupt_before_audio() {
        let raw = r#"{
            "serverContent": {
                "interrupted": true,
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}}
                ]}
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let mut seq = 0;
        let events = translate(msg, &mut seq);
        assert!(matches!(events[0], SessionEvent::Interrupted));
        assert!(matches!(events[1], SessionEvent::Audio(_)));
        assert_eq!(seq, 1);
    }

    #[test]
    fn test_translate_audio_format_and_seq() {
        let raw = r#"{
            "serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAAAA=="}},
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAAAA=="}}
            ]}}
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let mut seq = 0;
        let events = translate(msg, &mut seq);
        assert_eq!(events.len(), 2);
        for (i, event) in events.iter().enumerate() {
            match event {
                SessionEvent::Audio(frame) => {
                    assert_eq!(frame.format, AudioFormat::ai_output());
                    assert_eq!(frame.seq, i as u64);
                }
                other => panic!("expected audio, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_sink_reports_closed_session() {
        let (out_tx, out_rx) = mpsc::channel(4);
        drop(out_rx);
        let sink = GeminiSessionSink { out_tx };

        let frame = AudioFrame::new(Bytes::from(vec![0u8; 640]), AudioFormat::ai_input(), 0);
        assert!(matches!(sink.send_audio(frame), Err(AiError::NotConnected)));
        assert!(matches!(
            sink.send_text("hello").await,
            Err(AiError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_sink_backpressure_is_queue_full() {
        let (out_tx, _out_rx) = mpsc::channel(1);
        let sink = GeminiSessionSink { out_tx };

        let frame = AudioFrame::new(Bytes::from(vec![0u8; 640]), AudioFormat::ai_input(), 0);
        assert!(sink.send_audio(frame.clone()).is_ok());
        assert!(matches!(sink.send_audio(frame), Err(AiError::QueueFull)));
    }

    #[test]
    fn test_sink_rejects_wrong_format() {
        let (out_tx, _out_rx) = mpsc::channel(4);
        let sink = GeminiSessionSink { out_tx };

        let frame = AudioFrame::new(Bytes::from(vec![0u8; 480]), AudioFormat::ai_output(), 0);
        assert!(matches!(
            sink.send_audio(frame),
            Err(AiError::InvalidConfiguration(_))
        ));
    }
}
