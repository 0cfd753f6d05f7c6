//! Audio frame types and real-time format conversion.
//!
//! The telephony side of a call delivers narrow-band G.711 audio in fixed
//! 20 ms frames at 8 kHz; Gemini Live consumes 16 kHz linear PCM and produces
//! 24 kHz linear PCM. This module owns the representation of a frame and the
//! per-call [`FrameConverter`] that moves audio between the two worlds.

mod codec;
mod converter;
mod resampler;

pub use codec::{alaw_to_pcm16, pcm16_to_alaw, pcm16_to_ulaw, ulaw_to_pcm16};
pub use converter::{ConverterConfig, FrameConverter};
pub use resampler::Resampler;

use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while converting audio between representations.
///
/// These are local to a single frame: the caller drops the offending frame or
/// fails the session, the converter itself never aborts.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Frame payload was empty
    #[error("Empty audio frame")]
    EmptyFrame,

    /// Frame carried an encoding the direction does not accept
    #[error("Unexpected encoding {got} (expected {expected})")]
    UnexpectedEncoding {
        got: AudioEncoding,
        expected: AudioEncoding,
    },

    /// Frame sample rate does not match the configured direction
    #[error("Unexpected sample rate {got} Hz (expected {expected} Hz)")]
    UnexpectedRate { got: u32, expected: u32 },

    /// PCM16 payload with an odd byte length
    #[error("Truncated PCM16 payload ({0} bytes)")]
    TruncatedPcm(usize),
}

/// Result type for audio conversion.
pub type AudioResult<T> = Result<T, AudioError>;

// =============================================================================
// Frame Types
// =============================================================================

/// Sample encoding of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit signed linear PCM, little-endian
    Pcm16,
    /// G.711 u-law companded, 8 bits per sample
    G711Ulaw,
    /// G.711 A-law companded, 8 bits per sample
    G711Alaw,
}

impl AudioEncoding {
    /// Bytes per sample for this encoding.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            AudioEncoding::Pcm16 => 2,
            AudioEncoding::G711Ulaw | AudioEncoding::G711Alaw => 1,
        }
    }
}

impl std::fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioEncoding::Pcm16 => write!(f, "pcm16"),
            AudioEncoding::G711Ulaw => write!(f, "g711_ulaw"),
            AudioEncoding::G711Alaw => write!(f, "g711_alaw"),
        }
    }
}

/// Source representation of a frame's samples. Mono throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Sample encoding
    pub encoding: AudioEncoding,
    /// Channel count (always 1 for telephony)
    pub channels: u8,
}

impl AudioFormat {
    /// Telephony-side format for the given G.711 variant.
    pub fn telephony(encoding: AudioEncoding) -> Self {
        Self {
            sample_rate: 8_000,
            encoding,
            channels: 1,
        }
    }

    /// Format expected by Gemini Live for input audio.
    pub fn ai_input() -> Self {
        Self {
            sample_rate: 16_000,
            encoding: AudioEncoding::Pcm16,
            channels: 1,
        }
    }

    /// Format produced by Gemini Live for output audio.
    pub fn ai_output() -> Self {
        Self {
            sample_rate: 24_000,
            encoding: AudioEncoding::Pcm16,
            channels: 1,
        }
    }

    /// Number of samples covering `ms` milliseconds at this rate.
    pub fn samples_per_ms(&self, ms: u32) -> usize {
        (self.sample_rate as usize * ms as usize) / 1000
    }
}

/// A fixed-duration slice of audio samples tagged with its representation,
/// a per-direction monotonic sequence number, and a capture timestamp.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw sample payload
    pub payload: Bytes,
    /// Representation of the payload
    pub format: AudioFormat,
    /// Monotonic sequence number, assigned per direction
    pub seq: u64,
    /// Instant the frame was captured or produced
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Create a frame with the current instant as capture time.
    pub fn new(payload: Bytes, format: AudioFormat, seq: u64) -> Self {
        Self {
            payload,
            format,
            seq,
            captured_at: Instant::now(),
        }
    }

    /// Number of samples in the payload.
    pub fn sample_count(&self) -> usize {
        self.payload.len() / self.format.encoding.bytes_per_sample()
    }

    /// Duration covered by this frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.sample_count() as u64 * 1000) / self.format.sample_rate as u64
    }
}
