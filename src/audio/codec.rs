//! G.711 u-law and A-law transcoding.
//!
//! The PBX delivers companded 8-bit samples on the wire; Gemini wants 16-bit
//! linear PCM. Both companding variants follow the ITU-T G.711 segment
//! layout, operating per sample with no inter-sample state.

use bytes::{BufMut, Bytes, BytesMut};

/// Encoder bias applied before segment search (u-law).
const ULAW_BIAS: i32 = 0x84;
/// Largest magnitude representable after biasing (u-law).
const ULAW_CLIP: i32 = 32_635;

/// A-law segment boundaries on the 13-bit magnitude.
const ALAW_SEG_END: [i16; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

// =============================================================================
// Per-sample conversion
// =============================================================================

fn ulaw_encode_sample(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = (sample as i32).abs();
    if magnitude > ULAW_CLIP {
        magnitude = ULAW_CLIP;
    }
    magnitude += ULAW_BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (magnitude & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((magnitude >> (exponent as i32 + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

fn ulaw_decode_sample(ulaw: u8) -> i16 {
    let u = !ulaw;
    let exponent = (u >> 4) & 0x07;
    let mantissa = u & 0x0F;
    let magnitude = ((((mantissa as i32) << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if u & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

fn alaw_encode_sample(sample: i16) -> u8 {
    // A-law works on a 13-bit magnitude
    let mut pcm = sample >> 3;
    let mask: u8 = if pcm >= 0 {
        0xD5
    } else {
        pcm = -pcm - 1;
        0x55
    };

    let seg = ALAW_SEG_END
        .iter()
        .position(|&end| pcm <= end)
        .unwrap_or(ALAW_SEG_END.len());

    if seg >= 8 {
        0x7F ^ mask
    } else {
        let mut aval = (seg as u8) << 4;
        if seg < 2 {
            aval |= ((pcm >> 1) & 0x0F) as u8;
        } else {
            aval |= ((pcm >> seg) & 0x0F) as u8;
        }
        aval ^ mask
    }
}

fn alaw_decode_sample(alaw: u8) -> i16 {
    let a = alaw ^ 0x55;
    let mut t = ((a & 0x0F) as i16) << 4;
    let seg = (a & 0x70) >> 4;
    match seg {
        0 => t += 8,
        1 => t += 0x108,
        _ => {
            t += 0x108;
            t <<= seg - 1;
        }
    }
    if a & 0x80 != 0 { t } else { -t }
}

// =============================================================================
// Buffer conversion
// =============================================================================

/// Decode a G.711 u-law payload into 16-bit little-endian linear PCM.
pub fn ulaw_to_pcm16(ulaw: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(ulaw.len() * 2);
    for &b in ulaw {
        out.put_i16_le(ulaw_decode_sample(b));
    }
    out.freeze()
}

/// Encode 16-bit little-endian linear PCM into G.711 u-law.
///
/// A trailing odd byte, if any, is ignored; callers validate alignment first.
pub fn pcm16_to_ulaw(pcm: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(pcm.len() / 2);
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        out.put_u8(ulaw_encode_sample(sample));
    }
    out.freeze()
}

/// Decode a G.711 A-law payload into 16-bit little-endian linear PCM.
pub fn alaw_to_pcm16(alaw: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(alaw.len() * 2);
    for &b in alaw {
        out.put_i16_le(alaw_decode_sample(b));
    }
    out.freeze()
}

/// Encode 16-bit little-endian linear PCM into G.711 A-law.
pub fn pcm16_to_alaw(pcm: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(pcm.len() / 2);
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        out.put_u8(alaw_encode_sample(sample));
    }
    out.freeze()
}
