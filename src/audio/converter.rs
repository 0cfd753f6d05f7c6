//! Bidirectional frame conversion between the telephony and AI representations.
//!
//! One [`FrameConverter`] is owned by one call session and carries the
//! per-direction resampler state for that call. Both directions are
//! non-blocking: input that cannot yet fill an output unit is buffered
//! internally and an empty result is returned.
//!
//! Latency is bounded by a single buffering stage per direction: less than
//! one output frame of pending samples plus one resampler history sample.
//! Sustained clock drift on the AI side is corrected by dropping at most one
//! telephony frame per correction interval once the pending buffer passes the
//! high watermark, trading a periodic 20 ms gap for bounded latency.

use std::time::{Duration, Instant};

use bytes::Bytes;

use super::codec::{alaw_to_pcm16, pcm16_to_alaw, pcm16_to_ulaw, ulaw_to_pcm16};
use super::resampler::Resampler;
use super::{AudioEncoding, AudioError, AudioFormat, AudioFrame, AudioResult};

/// Configuration for a per-call frame converter.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// G.711 variant used on the telephony leg
    pub telephony_encoding: AudioEncoding,
    /// Telephony frame duration in milliseconds
    pub frame_ms: u32,
    /// Pending-buffer level (in telephony frames) above which drift
    /// correction starts dropping
    pub drift_high_watermark_frames: usize,
    /// Minimum spacing between two drift corrections
    pub drift_correction_interval: Duration,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            telephony_encoding: AudioEncoding::G711Ulaw,
            frame_ms: 20,
            drift_high_watermark_frames: 10,
            drift_correction_interval: Duration::from_secs(2),
        }
    }
}

/// Stateful converter between telephony G.711 frames and Gemini PCM.
///
/// Directions are independent: `to_ai` handles caller speech
/// (8 kHz G.711 -> 16 kHz PCM16), `from_ai` handles synthesized speech
/// (24 kHz PCM16 -> 8 kHz G.711 in exact telephony-sized frames).
pub struct FrameConverter {
    config: ConverterConfig,
    telephony_format: AudioFormat,

    to_ai_resampler: Resampler,
    to_ai_seq: u64,

    from_ai_resampler: Resampler,
    /// 8 kHz PCM samples waiting to fill a whole telephony frame
    from_ai_pending: Vec<i16>,
    from_ai_seq: u64,
    last_drift_correction: Option<Instant>,
}

impl FrameConverter {
    /// Create a converter for one call.
    pub fn new(config: ConverterConfig) -> Self {
        let telephony_format = AudioFormat::telephony(config.telephony_encoding);
        Self {
            to_ai_resampler: Resampler::new(
                telephony_format.sample_rate,
                AudioFormat::ai_input().sample_rate,
            ),
            from_ai_resampler: Resampler::new(
                AudioFormat::ai_output().sample_rate,
                telephony_format.sample_rate,
            ),
            from_ai_pending: Vec::new(),
            to_ai_seq: 0,
            from_ai_seq: 0,
            last_drift_correction: None,
            telephony_format,
            config,
        }
    }

    /// Samples in one telephony frame.
    fn frame_samples(&self) -> usize {
        self.telephony_format.samples_per_ms(self.config.frame_ms)
    }

    /// Clear all carried state. Call between calls when an instance is reused.
    pub fn reset(&mut self) {
        self.to_ai_resampler.reset();
        self.from_ai_resampler.reset();
        self.from_ai_pending.clear();
        self.to_ai_seq = 0;
        self.from_ai_seq = 0;
        self.last_drift_correction = None;
    }

    /// Convert a telephony frame into zero or more AI-input frames.
    ///
    /// Decodes G.711, resamples to 16 kHz, and emits whatever output the
    /// resampler can produce. Gemini accepts arbitrary chunk sizes, so output
    /// is not re-framed.
    pub fn to_ai(&mut self, frame: &AudioFrame) -> AudioResult<Vec<AudioFrame>> {
        if frame.payload.is_empty() {
            return Err(AudioError::EmptyFrame);
        }
        if frame.format.encoding != self.config.telephony_encoding {
            return Err(AudioError::UnexpectedEncoding {
                got: frame.format.encoding,
                expected: self.config.telephony_encoding,
            });
        }
        if frame.format.sample_rate != self.telephony_format.sample_rate {
            return Err(AudioError::UnexpectedRate {
                got: frame.format.sample_rate,
                expected: self.telephony_format.sample_rate,
            });
        }

        let pcm = match self.config.telephony_encoding {
            AudioEncoding::G711Ulaw => ulaw_to_pcm16(&frame.payload),
            AudioEncoding::G711Alaw => alaw_to_pcm16(&frame.payload),
            AudioEncoding::Pcm16 => frame.payload.clone(),
        };

        let samples = pcm_bytes_to_samples(&pcm)?;
        let resampled = self.to_ai_resampler.process(&samples);
        if resampled.is_empty() {
            return Ok(Vec::new());
        }

        let seq = self.to_ai_seq;
        self.to_ai_seq += 1;
        Ok(vec![AudioFrame::new(
            samples_to_pcm_bytes(&resampled),
            AudioFormat::ai_input(),
            seq,
        )])
    }

    /// Convert an AI output chunk into zero or more exact telephony frames.
    ///
    /// Resamples 24 kHz PCM down to the telephony rate, buffers until whole
    /// frames are available, and G.711-encodes each frame. The remainder stays
    /// buffered for the next chunk.
    pub fn from_ai(&mut self, frame: &AudioFrame) -> AudioResult<Vec<AudioFrame>> {
        if frame.payload.is_empty() {
            return Err(AudioError::EmptyFrame);
        }
        if frame.format.encoding != AudioEncoding::Pcm16 {
            return Err(AudioError::UnexpectedEncoding {
                got: frame.format.encoding,
                expected: AudioEncoding::Pcm16,
            });
        }
        if frame.format.sample_rate != AudioFormat::ai_output().sample_rate {
            return Err(AudioError::UnexpectedRate {
                got: frame.format.sample_rate,
                expected: AudioFormat::ai_output().sample_rate,
            });
        }

        let samples = pcm_bytes_to_samples(&frame.payload)?;
        self.from_ai_pending
            .extend(self.from_ai_resampler.process(&samples));

        self.correct_drift();

        let frame_samples = self.frame_samples();
        let mut out = Vec::with_capacity(self.from_ai_pending.len() / frame_samples);
        while self.from_ai_pending.len() >= frame_samples {
            let chunk: Vec<i16> = self.from_ai_pending.drain(..frame_samples).collect();
            let pcm = samples_to_pcm_bytes(&chunk);
            let encoded = match self.config.telephony_encoding {
                AudioEncoding::G711Ulaw => pcm16_to_ulaw(&pcm),
                AudioEncoding::G711Alaw => pcm16_to_alaw(&pcm),
                AudioEncoding::Pcm16 => pcm,
            };
            let seq = self.from_ai_seq;
            self.from_ai_seq += 1;
            out.push(AudioFrame::new(encoded, self.telephony_format, seq));
        }
        Ok(out)
    }

    /// Drop one frame of pending audio when the buffer has grown past the
    /// high watermark, at most once per correction interval.
    fn correct_drift(&mut self) {
        let frame_samples = self.frame_samples();
        let watermark = self.config.drift_high_watermark_frames * frame_samples;
        if self.from_ai_pending.len() <= watermark {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.last_drift_correction
            && now.duration_since(last) < self.config.drift_correction_interval
        {
            return;
        }
        self.from_ai_pending.drain(..frame_samples);
        self.last_drift_correction = Some(now);
        tracing::debug!(
            pending = self.from_ai_pending.len(),
            "Drift correction: dropped one pending telephony frame"
        );
    }

    /// Number of buffered output samples awaiting a full frame (AI -> telephony).
    pub fn pending_samples(&self) -> usize {
        self.from_ai_pending.len()
    }
}

fn pcm_bytes_to_samples(pcm: &[u8]) -> AudioResult<Vec<i16>> {
    if pcm.len() % 2 != 0 {
        return Err(AudioError::TruncatedPcm(pcm.len()));
    }
    Ok(pcm
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}

fn samples_to_pcm_bytes(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    Bytes::from(out)
}
