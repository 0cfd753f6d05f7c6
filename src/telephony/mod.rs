//! Boundary types for the SIP/PBX collaborator.
//!
//! The signaling and media stack (registration, INVITE handling, RTP, codec
//! framing) lives outside this crate. It talks to the bridge through the
//! event enum and the two traits here: events flow in through the session
//! registry, call control and media writes flow back out. Implementations
//! wrap whatever SIP stack the deployment uses; tests use in-process fakes.

use async_trait::async_trait;
use thiserror::Error;

use crate::audio::AudioFrame;
use crate::session::CallId;

// =============================================================================
// Error Types
// =============================================================================

/// Faults reported by or toward the telephony layer.
#[derive(Debug, Error)]
pub enum TelephonyError {
    /// Signaling operation failed (accept/reject/hangup)
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Media write failed or the media stream is gone
    #[error("Media error: {0}")]
    Media(String),

    /// The referenced call is not known to the telephony layer
    #[error("Unknown call: {0}")]
    UnknownCall(CallId),
}

/// Result type for telephony operations.
pub type TelephonyResult<T> = Result<T, TelephonyError>;

// =============================================================================
// Inbound Events
// =============================================================================

/// Caller identity attached to an offered call.
#[derive(Debug, Clone)]
pub struct CallerInfo {
    /// Remote URI or number as reported by the PBX
    pub remote_uri: String,
}

/// Events delivered by the telephony collaborator.
#[derive(Debug)]
pub enum TelephonyEvent {
    /// A new inbound call is offered and awaits accept/reject
    CallOffered { call: CallId, caller: CallerInfo },
    /// The PBX confirmed the call is answered and media is flowing
    CallAnswered { call: CallId },
    /// The remote side hung up or the PBX terminated the call
    CallTerminated { call: CallId, reason: String },
    /// One fixed-interval media frame from the caller
    Media { call: CallId, frame: AudioFrame },
    /// Registration with the PBX was gained or lost
    RegistrationChanged { registered: bool },
}

// =============================================================================
// Outbound Control
// =============================================================================

/// Signaling control for one offered or active call.
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Accept the offered call.
    async fn accept(&self) -> TelephonyResult<()>;

    /// Reject the offered call (busy or unavailable).
    async fn reject(&self) -> TelephonyResult<()>;

    /// Terminate an active call.
    async fn hangup(&self) -> TelephonyResult<()>;
}

/// Media sink for one active call.
///
/// `write_frame` is called from the playback ticker once per frame interval
/// and must not block beyond that budget.
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Write one telephony-format frame to the call's media stream.
    async fn write_frame(&self, frame: AudioFrame) -> TelephonyResult<()>;

    /// Discard any frames the sink still has queued (caller interrupted).
    async fn clear(&self) -> TelephonyResult<()>;
}
