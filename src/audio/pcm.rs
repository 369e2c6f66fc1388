//! PCM16 chunk decoding.
//!
//! Chunks arrive as base64 text wrapping little-endian signed 16-bit samples,
//! mono, at the agreed sample rate.

use crate::error::{AvatarError, Result};
use base64::Engine as _;

/// Decode a base64 chunk into PCM16 samples.
///
/// # Errors
///
/// Returns [`AvatarError::Decode`] for invalid base64 or an odd byte count.
pub fn decode_base64_chunk(chunk_base64: &str) -> Result<Vec<i16>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(chunk_base64.trim())
        .map_err(|e| AvatarError::Decode(format!("invalid base64: {e}")))?;
    pcm16_from_le_bytes(&bytes)
}

/// Reinterpret a byte payload as 16-bit signed little-endian samples.
///
/// # Errors
///
/// Returns [`AvatarError::Decode`] if the payload length is odd.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(AvatarError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Convert a PCM16 sample to f32 in [-1, 1).
#[inline]
#[must_use]
pub fn sample_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32_768.0
}

/// Encode samples back to base64 PCM16 (used by tests and tooling).
#[must_use]
pub fn encode_base64_chunk(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
