//! Call Session Lifecycle Tests
//!
//! End-to-end tests for the call-session bridge using in-process mock
//! collaborators: a scriptable AI session client and a recording telephony
//! layer. These verify the lifecycle state machine, audio forwarding, tool
//! dispatch, barge-in and teardown behavior without any network access.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use voicebridge::ai::{
    AiError, AiResult, AiSessionClient, AiSessionConfig, BoxedSessionSink, SessionEvent,
    SessionEvents, SessionSink,
};
use voicebridge::audio::{AudioEncoding, AudioFormat, AudioFrame};
use voicebridge::session::{
    CallId, CallSession, CallState, DisconnectPolicy, SessionConfig, SessionRegistry,
};
use voicebridge::telephony::{
    CallControl, CallerInfo, MediaSink, TelephonyEvent, TelephonyResult,
};
use voicebridge::tools::{ToolCall, ToolDispatcherBuilder, ToolOutcome, register_builtin_tools};

// =============================================================================
// Mock AI Client
// =============================================================================

#[derive(Default)]
struct MockAiShared {
    event_tx: Mutex<Option<mpsc::Sender<SessionEvent>>>,
    sent_audio: Mutex<Vec<AudioFrame>>,
    sent_texts: Mutex<Vec<String>>,
    sent_tool_results: Mutex<Vec<voicebridge::tools::ToolResult>>,
    connects: AtomicUsize,
    /// Bumped on every connect; sinks from older connections are dead
    generation: AtomicUsize,
    closed: AtomicBool,
    audio_always_full: AtomicBool,
}

impl MockAiShared {
    async fn push_event(&self, event: SessionEvent) {
        let tx = self.event_tx.lock().clone().expect("session not connected");
        tx.send(event).await.expect("event stream closed");
    }
}

#[derive(Clone)]
struct MockAiClient {
    shared: Arc<MockAiShared>,
    /// Connect attempts beyond this count are refused
    allowed_connects: usize,
}

impl MockAiClient {
    fn new() -> Self {
        Self {
            shared: Arc::new(MockAiShared::default()),
            allowed_connects: usize::MAX,
        }
    }

    fn rejecting() -> Self {
        Self {
            shared: Arc::new(MockAiShared::default()),
            allowed_connects: 0,
        }
    }

    /// Accepts exactly one connection; reconnect attempts all fail.
    fn single_connect() -> Self {
        Self {
            shared: Arc::new(MockAiShared::default()),
            allowed_connects: 1,
        }
    }
}

#[async_trait]
impl AiSessionClient for MockAiClient {
    async fn connect(
        &self,
        _config: &AiSessionConfig,
    ) -> AiResult<(BoxedSessionSink, SessionEvents)> {
        if self.shared.connects.load(Ordering::SeqCst) >= self.allowed_connects {
            return Err(if self.allowed_connects == 0 {
                AiError::AuthenticationFailed("bad credential".to_string())
            } else {
                AiError::ConnectionFailed("server unavailable".to_string())
            });
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(256);
        *self.shared.event_tx.lock() = Some(tx);
        let sink = MockSink {
            shared: self.shared.clone(),
            generation,
        };
        Ok((Box::new(sink), rx))
    }
}

struct MockSink {
    shared: Arc<MockAiShared>,
    generation: usize,
}

impl MockSink {
    /// A sink from a superseded connection behaves like a closed socket.
    fn live(&self) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == self.generation
    }
}

#[async_trait]
impl SessionSink for MockSink {
    fn send_audio(&self, frame: AudioFrame) -> AiResult<()> {
        if !self.live() {
            return Err(AiError::NotConnected);
        }
        if self.shared.audio_always_full.load(Ordering::SeqCst) {
            return Err(AiError::QueueFull);
        }
        self.shared.sent_audio.lock().push(frame);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> AiResult<()> {
        if !self.live() {
            return Err(AiError::NotConnected);
        }
        self.shared.sent_texts.lock().push(text.to_string());
        Ok(())
    }

    async fn send_tool_result(&self, result: voicebridge::tools::ToolResult) -> AiResult<()> {
        if !self.live() {
            return Err(AiError::NotConnected);
        }
        self.shared.sent_tool_results.lock().push(result);
        Ok(())
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Mock Telephony
// =============================================================================

#[derive(Default)]
struct MockControl {
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    hungup: AtomicUsize,
}

#[async_trait]
impl CallControl for MockControl {
    async fn accept(&self) -> TelephonyResult<()> {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self) -> TelephonyResult<()> {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn hangup(&self) -> TelephonyResult<()> {
        self.hungup.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct MockMedia {
    frames: Mutex<Vec<AudioFrame>>,
    cleared: AtomicUsize,
}

#[async_trait]
impl MediaSink for MockMedia {
    async fn write_frame(&self, frame: AudioFrame) -> TelephonyResult<()> {
        self.frames.lock().push(frame);
        Ok(())
    }

    async fn clear(&self) -> TelephonyResult<()> {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn test_session_config() -> SessionConfig {
    SessionConfig {
        ai: AiSessionConfig {
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            ..Default::default()
        },
        greeting_prompt: Some("greet the caller".to_string()),
        answer_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

fn make_session(
    ai: &MockAiClient,
    control: &Arc<MockControl>,
    media: &Arc<MockMedia>,
    config: SessionConfig,
) -> Arc<CallSession> {
    Arc::new(CallSession::new(
        CallId::new(),
        CallerInfo {
            remote_uri: "sip:caller@example.com".to_string(),
        },
        config,
        control.clone(),
        media.clone(),
        Arc::new(ai.clone()),
        Arc::new(
            register_builtin_tools(ToolDispatcherBuilder::new())
                .unwrap()
                .build(),
        ),
    ))
}

/// One 20 ms caller frame: 160 u-law silence bytes.
fn caller_frame(seq: u64) -> AudioFrame {
    AudioFrame::new(
        Bytes::from(vec![0xFFu8; 160]),
        AudioFormat::telephony(AudioEncoding::G711Ulaw),
        seq,
    )
}

/// One 20 ms AI output chunk: 960 samples of 24 kHz PCM16.
fn ai_audio_frame(seq: u64) -> AudioFrame {
    AudioFrame::new(
        Bytes::from(vec![0u8; 960 * 2]),
        AudioFormat::ai_output(),
        seq,
    )
}

async fn wait_for_state(session: &Arc<CallSession>, want: CallState) {
    let mut rx = session.watch_state();
    timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow() == want {
                return;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for {want:?}, session is {:?}",
            session.state()
        )
    });
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_full_call_lifecycle() {
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, test_session_config());

    assert_eq!(session.state(), CallState::Idle);
    session.clone().start().await.expect("start failed");
    wait_for_state(&session, CallState::Active).await;
    assert_eq!(control.accepted.load(Ordering::SeqCst), 1);

    // The assistant is prompted to speak first
    wait_until("greeting prompt", || {
        ai.shared.sent_texts.lock().contains(&"greet the caller".to_string())
    })
    .await;

    // Caller audio flows to the AI sink
    for seq in 0..10 {
        session.on_telephony_audio(caller_frame(seq));
    }
    wait_until("forwarded caller audio", || {
        !ai.shared.sent_audio.lock().is_empty()
    })
    .await;
    let forwarded = ai.shared.sent_audio.lock().clone();
    assert_eq!(forwarded[0].format, AudioFormat::ai_input());

    // AI audio flows back out through the playback ticker
    for seq in 0..5 {
        ai.shared.push_event(SessionEvent::Audio(ai_audio_frame(seq))).await;
    }
    wait_until("played frames", || !media.frames.lock().is_empty()).await;
    let played = media.frames.lock().clone();
    assert_eq!(played[0].format.sample_rate, 8000);
    assert_eq!(played[0].payload.len(), 160);

    session.stop("test done").await;
    assert_eq!(session.state(), CallState::Ended);
    assert_eq!(control.hungup.load(Ordering::SeqCst), 1);
    assert!(ai.shared.closed.load(Ordering::SeqCst));

    // Terminal state is absorbing and late frames are discarded
    let before = ai.shared.sent_audio.lock().len();
    session.on_telephony_audio(caller_frame(99));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ai.shared.sent_audio.lock().len(), before);
    assert_eq!(session.state(), CallState::Ended);
}

#[tokio::test]
async fn test_rejected_connect_fails_without_frames() {
    let ai = MockAiClient::rejecting();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, test_session_config());

    let result = session.clone().start().await;
    assert!(matches!(
        result,
        Err(voicebridge::session::SessionError::Ai(
            AiError::AuthenticationFailed(_)
        ))
    ));
    assert_eq!(session.state(), CallState::Failed);
    assert_eq!(control.rejected.load(Ordering::SeqCst), 1);
    assert_eq!(control.accepted.load(Ordering::SeqCst), 0);

    // Nothing was forwarded and nothing will be
    session.on_telephony_audio(caller_frame(0));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(ai.shared.sent_audio.lock().is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent_from_any_state() {
    // From Idle, never started
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, test_session_config());
    session.stop("early").await;
    assert!(session.state().is_terminal());
    session.stop("again").await;
    assert_eq!(control.hungup.load(Ordering::SeqCst), 1);

    // From Active
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, test_session_config());
    session.clone().start().await.unwrap();
    wait_for_state(&session, CallState::Active).await;

    let elapsed = Instant::now();
    session.stop("done").await;
    session.stop("done again").await;
    assert!(elapsed.elapsed() < Duration::from_secs(2));
    assert_eq!(session.state(), CallState::Ended);
    assert_eq!(control.hungup.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, test_session_config());
    session.clone().start().await.unwrap();
    wait_for_state(&session, CallState::Active).await;
    assert!(matches!(
        session.clone().start().await,
        Err(voicebridge::session::SessionError::AlreadyStarted)
    ));
    session.stop("cleanup").await;
}

#[tokio::test]
async fn test_ai_close_ends_call() {
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, test_session_config());
    session.clone().start().await.unwrap();
    wait_for_state(&session, CallState::Active).await;

    ai.shared
        .push_event(SessionEvent::Closed {
            reason: Some("server went away".to_string()),
        })
        .await;
    wait_for_state(&session, CallState::Ended).await;
    assert_eq!(control.hungup.load(Ordering::SeqCst), 1);
}

fn reconnect_config() -> SessionConfig {
    let mut config = test_session_config();
    config.disconnect_policy = DisconnectPolicy::Reconnect {
        max_attempts: 3,
        delay: Duration::from_millis(1),
    };
    config
}

#[tokio::test]
async fn test_reconnect_resumes_audio_and_tools() {
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, reconnect_config());
    session.clone().start().await.unwrap();
    wait_for_state(&session, CallState::Active).await;

    // The link drops mid-call; the session reconnects and stays Active
    ai.shared
        .push_event(SessionEvent::Closed {
            reason: Some("link dropped".to_string()),
        })
        .await;
    wait_until("reconnect", || ai.shared.connects.load(Ordering::SeqCst) == 2).await;
    assert_eq!(session.state(), CallState::Active);

    // Caller audio keeps flowing, now into the replacement session; the old
    // sink refuses everything, so anything recorded from here on went
    // through the new one.
    ai.shared.sent_audio.lock().clear();
    timeout(Duration::from_secs(5), async {
        let mut seq = 0;
        loop {
            for _ in 0..5 {
                session.on_telephony_audio(caller_frame(seq));
                seq += 1;
            }
            if !ai.shared.sent_audio.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("caller audio did not reach the reconnected session");

    // Tool results also reach the replacement session
    ai.shared
        .push_event(SessionEvent::ToolCall(ToolCall {
            id: "call-after-reconnect".to_string(),
            name: "get_service_status".to_string(),
            args: serde_json::Map::new(),
        }))
        .await;
    wait_until("tool result", || {
        !ai.shared.sent_tool_results.lock().is_empty()
    })
    .await;
    assert_eq!(
        ai.shared.sent_tool_results.lock()[0].call_id,
        "call-after-reconnect"
    );

    session.stop("cleanup").await;
}

#[tokio::test]
async fn test_reconnect_exhaustion_ends_call() {
    let ai = MockAiClient::single_connect();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, reconnect_config());
    session.clone().start().await.unwrap();
    wait_for_state(&session, CallState::Active).await;

    ai.shared
        .push_event(SessionEvent::Closed {
            reason: Some("link dropped".to_string()),
        })
        .await;

    // All retry attempts fail; the call ends in bounded time
    wait_for_state(&session, CallState::Ended).await;
    assert_eq!(ai.shared.connects.load(Ordering::SeqCst), 1);
    assert_eq!(control.hungup.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Barge-in and Backpressure
// =============================================================================

#[tokio::test]
async fn test_barge_in_discards_queued_audio() {
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, test_session_config());
    session.clone().start().await.unwrap();
    wait_for_state(&session, CallState::Active).await;

    // Queue a burst of output, then the caller barges in
    for seq in 0..30 {
        ai.shared.push_event(SessionEvent::Audio(ai_audio_frame(seq))).await;
    }
    ai.shared.push_event(SessionEvent::Interrupted).await;

    wait_until("media sink flush", || media.cleared.load(Ordering::SeqCst) > 0).await;

    // Whatever plays after the flush is ticker silence, not stale output
    tokio::time::sleep(Duration::from_millis(60)).await;
    let after_flush = media.frames.lock().clone();
    if let Some(frame) = after_flush.last() {
        assert!(frame.payload.iter().all(|&b| b == 0xFF));
    }

    session.stop("cleanup").await;
}

#[tokio::test]
async fn test_telephony_callback_never_blocks_on_stalled_sink() {
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let mut config = test_session_config();
    config.outbound_queue_frames = 4;
    let session = make_session(&ai, &control, &media, config);
    session.clone().start().await.unwrap();
    wait_for_state(&session, CallState::Active).await;

    // Sink refuses everything from now on
    ai.shared.audio_always_full.store(true, Ordering::SeqCst);

    let start = Instant::now();
    for seq in 0..500 {
        session.on_telephony_audio(caller_frame(seq));
    }
    // 500 frames enqueue in a bounded queue without ever blocking
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(ai.shared.sent_audio.lock().is_empty());

    session.stop("cleanup").await;
}

// =============================================================================
// Tool Dispatch
// =============================================================================

#[tokio::test]
async fn test_tool_call_yields_correlated_result() {
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, test_session_config());
    session.clone().start().await.unwrap();
    wait_for_state(&session, CallState::Active).await;

    ai.shared
        .push_event(SessionEvent::ToolCall(ToolCall {
            id: "call-1".to_string(),
            name: "get_service_status".to_string(),
            args: serde_json::Map::new(),
        }))
        .await;

    wait_until("tool result", || !ai.shared.sent_tool_results.lock().is_empty()).await;
    let results = ai.shared.sent_tool_results.lock().clone();
    assert_eq!(results[0].call_id, "call-1");
    assert!(matches!(results[0].outcome, ToolOutcome::Ok(_)));

    session.stop("cleanup").await;
}

#[tokio::test]
async fn test_unknown_tool_yields_failure_result() {
    let ai = MockAiClient::new();
    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = make_session(&ai, &control, &media, test_session_config());
    session.clone().start().await.unwrap();
    wait_for_state(&session, CallState::Active).await;

    ai.shared
        .push_event(SessionEvent::ToolCall(ToolCall {
            id: "call-2".to_string(),
            name: "launch_rockets".to_string(),
            args: serde_json::Map::new(),
        }))
        .await;

    wait_until("tool result", || !ai.shared.sent_tool_results.lock().is_empty()).await;
    let results = ai.shared.sent_tool_results.lock().clone();
    assert_eq!(results[0].call_id, "call-2");
    match &results[0].outcome {
        ToolOutcome::Err(reason) => assert!(reason.contains("launch_rockets")),
        other => panic!("expected failure result, got {other:?}"),
    }

    session.stop("cleanup").await;
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn test_registry_single_call_and_busy_reject() {
    let ai = MockAiClient::new();
    let tools = Arc::new(
        register_builtin_tools(ToolDispatcherBuilder::new())
            .unwrap()
            .build(),
    );
    let registry = SessionRegistry::new(Arc::new(ai.clone()), tools, test_session_config());

    let control_a = Arc::new(MockControl::default());
    let media_a = Arc::new(MockMedia::default());
    let first = registry
        .offer_call(
            CallId::new(),
            CallerInfo {
                remote_uri: "sip:alice@example.com".to_string(),
            },
            control_a.clone(),
            media_a,
        )
        .expect("first call accepted");
    wait_for_state(&first, CallState::Active).await;

    // A second offer while the line is busy gets rejected
    let control_b = Arc::new(MockControl::default());
    let media_b = Arc::new(MockMedia::default());
    let second = registry.offer_call(
        CallId::new(),
        CallerInfo {
            remote_uri: "sip:bob@example.com".to_string(),
        },
        control_b.clone(),
        media_b,
    );
    assert!(second.is_none());
    wait_until("busy reject", || control_b.rejected.load(Ordering::SeqCst) == 1).await;

    // Remote hangup ends the first call and frees the line
    registry.handle_event(TelephonyEvent::CallTerminated {
        call: first.id(),
        reason: "caller hung up".to_string(),
    });
    wait_for_state(&first, CallState::Ended).await;
    registry.reap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_registry_routes_media() {
    let ai = MockAiClient::new();
    let tools = Arc::new(
        register_builtin_tools(ToolDispatcherBuilder::new())
            .unwrap()
            .build(),
    );
    let registry = SessionRegistry::new(Arc::new(ai.clone()), tools, test_session_config());

    let control = Arc::new(MockControl::default());
    let media = Arc::new(MockMedia::default());
    let session = registry
        .offer_call(
            CallId::new(),
            CallerInfo {
                remote_uri: "sip:alice@example.com".to_string(),
            },
            control,
            media,
        )
        .unwrap();
    wait_for_state(&session, CallState::Active).await;

    for seq in 0..10 {
        registry.handle_event(TelephonyEvent::Media {
            call: session.id(),
            frame: caller_frame(seq),
        });
    }
    wait_until("routed audio", || !ai.shared.sent_audio.lock().is_empty()).await;

    registry.shutdown().await;
    assert_eq!(session.state(), CallState::Ended);
}
