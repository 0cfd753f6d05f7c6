//! Call session lifecycle and audio pumping.
//!
//! A [`CallSession`] owns one telephone call end to end: it answers the call,
//! opens the AI conversation, pumps audio both directions through the
//! [`FrameConverter`], dispatches tool calls, and tears everything down
//! exactly once. The state machine is strictly ordered and terminal states
//! are absorbing:
//!
//! ```text
//! Idle -> Answering -> Active -> Ending -> Ended
//!           |            |
//!           +-> Failed   +-> Failed
//! ```
//!
//! # Real-time discipline
//!
//! The telephony media callback must return within one frame interval, so
//! [`CallSession::on_telephony_audio`] does bounded conversion work and a
//! non-blocking enqueue; everything that can wait runs on per-session tasks
//! that end when the session's `CancellationToken` fires.

mod outbound;
mod registry;

pub use outbound::FrameQueue;
pub use registry::SessionRegistry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::{
    AiError, AiSessionClient, AiSessionConfig, SessionEvent, SessionEvents, SessionSink,
};
use crate::audio::{AudioEncoding, AudioFormat, AudioFrame, ConverterConfig, FrameConverter};
use crate::telephony::{CallControl, CallerInfo, MediaSink, TelephonyError};
use crate::tools::ToolDispatcher;

// =============================================================================
// Identifiers and States
// =============================================================================

/// Stable identifier of one call, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(Uuid);

impl CallId {
    /// Generate a fresh call id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Created, not yet started
    Idle,
    /// Answering the call and opening the AI session
    Answering,
    /// Conversation in progress, audio flowing both ways
    Active,
    /// Orderly teardown in progress
    Ending,
    /// Terminated normally
    Ended,
    /// Terminated due to a fault
    Failed,
}

impl CallState {
    /// Whether this state is absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::Answering => "answering",
            CallState::Active => "active",
            CallState::Ending => "ending",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Errors and Policy
// =============================================================================

/// Faults surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// AI session fault
    #[error("AI session error: {0}")]
    Ai(#[from] AiError),

    /// Telephony fault
    #[error("Telephony error: {0}")]
    Telephony(#[from] TelephonyError),

    /// `start` called more than once
    #[error("Session already started")]
    AlreadyStarted,
}

/// What to do when the AI link drops mid-call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectPolicy {
    /// End the call immediately (default)
    #[default]
    HangupImmediately,
    /// Try to re-open the AI session a bounded number of times, then hang up
    Reconnect {
        /// Attempts before giving up
        max_attempts: u32,
        /// Pause between attempts
        delay: Duration,
    },
}

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// AI session configuration (credentials, model, persona, tools)
    pub ai: AiSessionConfig,
    /// Audio converter configuration
    pub converter: ConverterConfig,
    /// One-shot text turn sent when the call goes active, so the assistant
    /// speaks first
    pub greeting_prompt: Option<String>,
    /// Pause before accepting the offered call
    pub answer_delay: Duration,
    /// Mid-call AI link loss policy
    pub disconnect_policy: DisconnectPolicy,
    /// Playback queue bound, in 20 ms frames
    pub playback_queue_frames: usize,
    /// Caller-to-AI queue bound, in frames
    pub outbound_queue_frames: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ai: AiSessionConfig::default(),
            converter: ConverterConfig::default(),
            greeting_prompt: None,
            answer_delay: Duration::from_millis(200),
            disconnect_policy: DisconnectPolicy::default(),
            playback_queue_frames: 100,
            outbound_queue_frames: 50,
        }
    }
}

// =============================================================================
// Call Session
// =============================================================================

/// One live call bridged to one AI conversation.
pub struct CallSession {
    id: CallId,
    caller: CallerInfo,
    config: SessionConfig,
    control: Arc<dyn CallControl>,
    media: Arc<dyn MediaSink>,
    ai_client: Arc<dyn AiSessionClient>,
    tools: Arc<ToolDispatcher>,

    state_tx: watch::Sender<CallState>,
    cancel: CancellationToken,
    started: AtomicBool,
    finishing: AtomicBool,

    converter: Mutex<FrameConverter>,
    ai_sink: Mutex<Option<Arc<dyn SessionSink>>>,
    /// Caller audio awaiting the AI sink
    outbound: Arc<FrameQueue>,
    /// Synthesized audio awaiting the playback ticker
    playback: Arc<FrameQueue>,
}

impl CallSession {
    /// Create a session in `Idle` for an offered call.
    pub fn new(
        id: CallId,
        caller: CallerInfo,
        config: SessionConfig,
        control: Arc<dyn CallControl>,
        media: Arc<dyn MediaSink>,
        ai_client: Arc<dyn AiSessionClient>,
        tools: Arc<ToolDispatcher>,
    ) -> Self {
        let (state_tx, _) = watch::channel(CallState::Idle);
        let converter = FrameConverter::new(config.converter.clone());
        let outbound = Arc::new(FrameQueue::new(config.outbound_queue_frames));
        let playback = Arc::new(FrameQueue::new(config.playback_queue_frames));
        Self {
            id,
            caller,
            config,
            control,
            media,
            ai_client,
            tools,
            state_tx,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            finishing: AtomicBool::new(false),
            converter: Mutex::new(converter),
            ai_sink: Mutex::new(None),
            outbound,
            playback,
        }
    }

    /// Call id.
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Caller identity.
    pub fn caller(&self) -> &CallerInfo {
        &self.caller
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CallState {
        *self.state_tx.borrow()
    }

    /// Watch handle for state transitions.
    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state_tx.subscribe()
    }

    /// Frames evicted from the playback queue under pressure.
    pub fn playback_dropped(&self) -> u64 {
        self.playback.dropped()
    }

    /// Move to `to` unless a terminal state was already reached.
    fn transition(&self, to: CallState) {
        self.state_tx.send_if_modified(|state| {
            if state.is_terminal() || *state == to {
                false
            } else {
                tracing::info!(call = %self.id, from = %state, to = %to, "Call state");
                *state = to;
                true
            }
        });
    }

    /// Answer the call and open the AI conversation.
    ///
    /// Connects the AI session first so the caller never hears a dead line:
    /// if the backend rejects us, the call is rejected and the session ends
    /// in `Failed` without a single forwarded frame.
    pub async fn start(self: Arc<Self>) -> Result<(), SessionError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }
        self.transition(CallState::Answering);

        let connect_result = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            result = self.ai_client.connect(&self.config.ai) => result,
        };

        let (sink, events) = match connect_result {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(call = %self.id, error = %e, "AI connect failed, rejecting call");
                let _ = self.control.reject().await;
                self.transition(CallState::Failed);
                return Err(e.into());
            }
        };
        let sink: Arc<dyn SessionSink> = Arc::from(sink);
        *self.ai_sink.lock() = Some(sink.clone());

        tokio::select! {
            _ = self.cancel.cancelled() => {
                sink.close().await;
                return Ok(());
            }
            _ = tokio::time::sleep(self.config.answer_delay) => {}
        }

        if let Err(e) = self.control.accept().await {
            tracing::error!(call = %self.id, error = %e, "Accept failed");
            sink.close().await;
            self.transition(CallState::Failed);
            return Err(e.into());
        }

        self.transition(CallState::Active);
        tracing::info!(call = %self.id, caller = %self.caller.remote_uri, "Call active");

        if let Some(prompt) = &self.config.greeting_prompt
            && let Err(e) = sink.send_text(prompt).await
        {
            tracing::warn!(call = %self.id, error = %e, "Greeting prompt not sent");
        }

        self.clone().spawn_outbound_pump();
        self.clone().spawn_playback_ticker();
        self.spawn_ai_loop(events);
        Ok(())
    }

    /// Handle one caller media frame.
    ///
    /// Only `Active` sessions forward audio; frames in any other state are
    /// silently discarded, as are frames the converter rejects. Bounded work,
    /// never blocks.
    pub fn on_telephony_audio(&self, frame: AudioFrame) {
        if self.state() != CallState::Active {
            return;
        }
        let converted = match self.converter.lock().to_ai(&frame) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(call = %self.id, error = %e, "Dropping malformed caller frame");
                return;
            }
        };
        for frame in converted {
            self.outbound.push(frame);
        }
    }

    /// Stop the session from any state. Idempotent, bounded time.
    pub async fn stop(&self, reason: &str) {
        self.finish(reason, false).await;
    }

    /// One-shot orderly teardown.
    async fn finish(&self, reason: &str, failed: bool) {
        if self.finishing.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(call = %self.id, reason = reason, "Ending call");
        self.transition(CallState::Ending);
        self.cancel.cancel();

        let sink = self.ai_sink.lock().take();
        if let Some(sink) = sink {
            sink.close().await;
        }
        self.outbound.clear();
        self.playback.clear();
        let _ = self.control.hangup().await;

        self.transition(if failed {
            CallState::Failed
        } else {
            CallState::Ended
        });
    }

    /// Pump caller audio from the outbound queue into the current AI sink.
    ///
    /// The sink is re-read from `ai_sink` on every send, so after a
    /// reconnect swaps in a new session the pump carries on with it; the
    /// pump task itself lives until the session is cancelled.
    fn spawn_outbound_pump(self: Arc<Self>) {
        let session = self;
        let frame_interval = Duration::from_millis(u64::from(session.config.converter.frame_ms));
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    frame = session.outbound.pop_wait() => frame,
                };
                let sink = session.ai_sink.lock().clone();
                let sent = match &sink {
                    Some(sink) => sink.send_audio(frame.clone()),
                    None => Err(AiError::NotConnected),
                };
                match sent {
                    Ok(()) => {}
                    Err(AiError::QueueFull) | Err(AiError::NotConnected) => {
                        // Momentary backpressure, or the gap between a dead
                        // connection and its replacement; hold the frame and
                        // retry. The queue's drop-oldest bound caps staleness.
                        session.outbound.push_front(frame);
                        tokio::select! {
                            _ = session.cancel.cancelled() => break,
                            _ = tokio::time::sleep(frame_interval) => {}
                        }
                    }
                    Err(e) => {
                        tracing::warn!(call = %session.id, error = %e,
                            "Dropping unsendable caller frame");
                    }
                }
            }
        });
    }

    /// Write one frame to the caller every frame interval, silence when the
    /// playback queue is empty.
    fn spawn_playback_ticker(self: Arc<Self>) {
        let session = self;
        tokio::spawn(async move {
            let format = AudioFormat::telephony(session.config.converter.telephony_encoding);
            let frame_ms = session.config.converter.frame_ms;
            let silence = silence_payload(format, frame_ms);
            let mut silence_seq: u64 = 0;

            let mut ticker =
                tokio::time::interval(Duration::from_millis(u64::from(frame_ms)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let frame = session.playback.pop().unwrap_or_else(|| {
                    silence_seq += 1;
                    AudioFrame::new(silence.clone(), format, silence_seq)
                });
                if let Err(e) = session.media.write_frame(frame).await {
                    tracing::warn!(call = %session.id, error = %e, "Media write failed");
                    session.finish("media failure", true).await;
                    break;
                }
            }
        });
    }

    /// Consume the AI event stream until close or cancellation.
    fn spawn_ai_loop(self: Arc<Self>, events: SessionEvents) {
        let session = self;
        tokio::spawn(async move {
            let mut events = events;
            loop {
                let event = tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Some(SessionEvent::Audio(frame)) => {
                        let converted = match session.converter.lock().from_ai(&frame) {
                            Ok(frames) => frames,
                            Err(e) => {
                                tracing::warn!(call = %session.id, error = %e,
                                    "Dropping malformed AI audio chunk");
                                continue;
                            }
                        };
                        for frame in converted {
                            session.playback.push(frame);
                        }
                    }
                    Some(SessionEvent::Text(text)) => {
                        tracing::debug!(call = %session.id, text = %text, "Model text");
                    }
                    Some(SessionEvent::ToolCall(call)) => {
                        session.clone().spawn_tool_dispatch(call);
                    }
                    Some(SessionEvent::ToolCallCancelled { ids }) => {
                        // Running handlers finish; their late results are
                        // superseded on the backend side.
                        tracing::info!(call = %session.id, ?ids, "Tool calls cancelled");
                    }
                    Some(SessionEvent::Interrupted) => {
                        let discarded = session.playback.clear();
                        if let Err(e) = session.media.clear().await {
                            tracing::warn!(call = %session.id, error = %e, "Media clear failed");
                        }
                        tracing::debug!(call = %session.id, discarded, "Caller barge-in");
                    }
                    Some(SessionEvent::TurnComplete) => {
                        tracing::trace!(call = %session.id, "Model turn complete");
                    }
                    Some(SessionEvent::Closed { reason }) => {
                        tracing::info!(call = %session.id, ?reason, "AI session closed");
                        match session.try_reconnect().await {
                            Some(new_events) => {
                                events = new_events;
                                continue;
                            }
                            None => {
                                session.finish("AI session closed", false).await;
                                break;
                            }
                        }
                    }
                    None => {
                        session.finish("AI event stream ended", false).await;
                        break;
                    }
                }
            }
        });
    }

    /// Dispatch one tool call on its own task; exactly one correlated result
    /// goes back unless the session stops first.
    fn spawn_tool_dispatch(self: Arc<Self>, call: crate::tools::ToolCall) {
        let session = self;
        tokio::spawn(async move {
            let result = session.tools.dispatch(call).await;
            let sink = session.ai_sink.lock().clone();
            let Some(sink) = sink else { return };
            tokio::select! {
                _ = session.cancel.cancelled() => {
                    tracing::debug!(call = %session.id, "Discarding tool result, session stopped");
                }
                sent = sink.send_tool_result(result) => {
                    if let Err(e) = sent {
                        tracing::warn!(call = %session.id, error = %e, "Tool result not sent");
                    }
                }
            }
        });
    }

    /// Try to re-open the AI session per the disconnect policy.
    async fn try_reconnect(&self) -> Option<SessionEvents> {
        let DisconnectPolicy::Reconnect {
            max_attempts,
            delay,
        } = self.config.disconnect_policy
        else {
            return None;
        };

        for attempt in 1..=max_attempts {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            tracing::info!(call = %self.id, attempt, max_attempts, "Reconnecting AI session");
            match self.ai_client.connect(&self.config.ai).await {
                Ok((sink, events)) => {
                    let sink: Arc<dyn SessionSink> = Arc::from(sink);
                    *self.ai_sink.lock() = Some(sink);
                    // Converter state is stale across the gap
                    self.converter.lock().reset();
                    return Some(events);
                }
                Err(e) => {
                    tracing::warn!(call = %self.id, attempt, error = %e, "Reconnect failed");
                }
            }
        }
        None
    }
}

/// One frame of companded silence for the given telephony format.
fn silence_payload(format: AudioFormat, frame_ms: u32) -> Bytes {
    let silence_byte = match format.encoding {
        AudioEncoding::G711Ulaw => 0xFFu8,
        AudioEncoding::G711Alaw => 0xD5u8,
        AudioEncoding::Pcm16 => 0x00u8,
    };
    let len = format.samples_per_ms(frame_ms) * format.encoding.bytes_per_sample();
    Bytes::from(vec![silence_byte; len])
}

// =============================================================================
// Tests
// =============================================================================
