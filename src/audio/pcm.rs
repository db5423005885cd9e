//! PCM conversion helpers.
//!
//! Speech endpoints configured with `response_format = "pcm"` return raw
//! 16-bit little-endian mono samples.  This module converts them to `f32`
//! and resamples to the output device rate.
//!
//! 1. [`decode_pcm16le`]: bytes → `f32` samples in `[-1.0, 1.0]`.
//! 2. [`resample`]: any source rate → any target rate.

use super::backend::PlaybackError;

// ---------------------------------------------------------------------------
// decode_pcm16le
// ---------------------------------------------------------------------------

/// Convert raw 16-bit little-endian PCM to `f32`.
///
/// # Errors
///
/// [`PlaybackError::Decode`] when `bytes` is empty or has an odd length.
///
/// # Example
///
/// ```rust
/// use chat_playback::audio::decode_pcm16le;
///
/// let bytes = [0x00, 0x40, 0x00, 0xC0]; // 16384, -16384
/// let samples = decode_pcm16le(&bytes).unwrap();
/// assert_eq!(samples, vec![0.5, -0.5]);
/// ```
pub fn decode_pcm16le(bytes: &[u8]) -> Result<Vec<f32>, PlaybackError> {
    if bytes.is_empty() {
        return Err(PlaybackError::Decode("empty audio".into()));
    }
    if bytes.len() % 2 != 0 {
        return Err(PlaybackError::Decode(format!(
            "odd byte count {} for 16-bit PCM",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
        .collect())
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample `samples` from `source_rate` Hz to `target_rate` Hz using linear
/// interpolation.
///
/// * Equal rates return the input unchanged.
/// * Empty input or a zero rate returns an empty vector.
///
/// The output length is approximately
/// `samples.len() * target_rate / source_rate`.
///
/// # Example
///
/// ```rust
/// use chat_playback::audio::resample;
///
/// // Upsample from 24 kHz to 48 kHz (ratio = 2)
/// let lo = vec![0.5_f32; 240];
/// let hi = resample(&lo, 24_000, 48_000);
/// assert_eq!(hi.len(), 480);
/// ```
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            // Linear interpolation between adjacent samples
            samples[idx] * (1.0 - frac as f32) + samples[idx + 1] * frac as f32
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
