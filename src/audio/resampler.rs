//! Stateful sample-rate conversion.
//!
//! Linear-interpolation resampler that carries its cursor and input history
//! across calls, so a continuous stream can be fed chunk by chunk without
//! seams. The cursor is kept as an exact rational (numerator over the output
//! rate), so repeated processing accumulates zero positional drift.

/// Streaming linear resampler between two fixed rates.
///
/// One instance handles one direction of one call. Feed consecutive chunks of
/// the same stream through [`Resampler::process`]; call [`Resampler::reset`]
/// between calls.
#[derive(Debug)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    /// Unconsumed input history, starting at the cursor's reference sample
    buf: Vec<i16>,
    /// Cursor position on the input timeline relative to `buf[0]`,
    /// expressed as a numerator over `to_rate`
    pos_num: u64,
}

impl Resampler {
    /// Create a resampler converting `from_rate` Hz input to `to_rate` Hz output.
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        debug_assert!(from_rate > 0 && to_rate > 0);
        Self {
            from_rate,
            to_rate,
            buf: Vec::new(),
            pos_num: 0,
        }
    }

    /// Input rate in Hz.
    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Output rate in Hz.
    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Drop all carried state. Call when a new audio stream begins.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos_num = 0;
    }

    /// Resample the next chunk of the stream.
    ///
    /// Returns every output sample that can be produced from the input seen so
    /// far; at most one input sample of history is retained, so latency is
    /// bounded by a single sample period.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }

        self.buf.extend_from_slice(input);

        let denom = self.to_rate as u64;
        let step = self.from_rate as u64;
        let expected = (input.len() as u64 * denom) / step + 2;
        let mut out = Vec::with_capacity(expected as usize);

        loop {
            let idx = (self.pos_num / denom) as usize;
            // Interpolation needs the sample on each side of the cursor
            if idx + 1 >= self.buf.len() {
                break;
            }
            let frac = (self.pos_num % denom) as i64;
            let s0 = self.buf[idx] as i64;
            let s1 = self.buf[idx + 1] as i64;
            out.push((s0 + ((s1 - s0) * frac) / denom as i64) as i16);
            self.pos_num += step;
        }

        // Discard history behind the cursor, keeping the reference sample
        let consumed = ((self.pos_num / denom) as usize).min(self.buf.len());
        if consumed > 0 {
            self.buf.drain(..consumed);
            self.pos_num -= consumed as u64 * denom;
        }

        out
    }
}
