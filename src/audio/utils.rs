// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Audio utility functions.
//!
//! Helpers for PCM16 audio (16-bit signed little-endian) used throughout the
//! engine: RMS energy, exponential smoothing, silence detection, duration
//! math, and conversions to/from `f32` sample buffers for the stretch path.

/// Peak amplitude below which PCM16 audio is considered silence.
///
/// Normal speech typically produces amplitude values between +/-500 and
/// +/-5000 depending on loudness and microphone gain; this sits well below
/// typical speech levels.
pub const SILENCE_PEAK_THRESHOLD: i16 = 20;

/// Calculate the RMS energy of PCM16 audio, normalized to `[0.0, 1.0]`.
///
/// Interprets the byte slice as little-endian 16-bit signed samples. Returns
/// `0.0` for an empty (or sub-sample) slice.
pub fn calculate_rms(audio: &[u8]) -> f64 {
    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    for pair in audio.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64;
        sum_squares += sample * sample;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    let rms = (sum_squares / count as f64).sqrt();
    (rms / i16::MAX as f64).clamp(0.0, 1.0)
}

/// Apply exponential smoothing to a value.
///
/// `factor` is in `[0.0, 1.0]`; higher values weight the new value more.
pub fn exp_smoothing(value: f64, prev_value: f64, factor: f64) -> f64 {
    prev_value + factor * (value - prev_value)
}

/// Determine whether a PCM16 buffer contains only silence.
///
/// Compares the maximum absolute amplitude against
/// [`SILENCE_PEAK_THRESHOLD`]. Empty buffers count as silence.
pub fn is_silence(pcm: &[u8]) -> bool {
    let mut max_abs: i16 = 0;
    for pair in pcm.chunks_exact(2) {
        let abs = i16::from_le_bytes([pair[0], pair[1]]).saturating_abs();
        if abs > max_abs {
            max_abs = abs;
        }
    }
    max_abs <= SILENCE_PEAK_THRESHOLD
}

/// Duration in milliseconds of a mono PCM16 buffer of `num_bytes` at the
/// given sample rate.
pub fn pcm16_duration_ms(num_bytes: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let samples = (num_bytes / 2) as u64;
    samples * 1_000 / sample_rate as u64
}

/// Convert PCM16 bytes to normalized `f32` samples in `[-1.0, 1.0]`.
///
/// A trailing odd byte, if any, is ignored.
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Convert normalized `f32` samples back to PCM16 bytes, clamping to range.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
