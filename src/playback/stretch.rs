// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Pitch-preserving time stretch.
//!
//! Two of the three layered speed mechanisms live here (the third, the
//! persona tier, is server-side):
//!
//! - **Macro stretch**: an overlap-correlate-and-blend technique over short
//!   (~30 ms) windows. Whole pitch periods are dropped at window seams, so
//!   duration shrinks while pitch is preserved. The factor is keyed to the
//!   combined backlog in discrete steps, bounded to 1.30x.
//! - **Micro smoothing**: a small always-on interpolation-based rate nudge
//!   (<= ~2%) that masks the seams the macro stretch leaves behind. Bounded
//!   small enough to be imperceptible as pitch shift.

use serde::{Deserialize, Serialize};

/// Discrete macro stretch steps keyed to combined backlog.
///
/// Non-decreasing in backlog and bounded within `[1.00, 1.30]`.
pub fn macro_factor_for_backlog_ms(combined_backlog_ms: u64) -> f64 {
    match combined_backlog_ms {
        0..=4_999 => 1.00,
        5_000..=9_999 => 1.05,
        10_000..=14_999 => 1.10,
        15_000..=19_999 => 1.20,
        _ => 1.30,
    }
}

/// Macro stretch bounds, used by tests and the renderer's composition check.
pub const MACRO_FACTOR_MIN: f64 = 1.00;
pub const MACRO_FACTOR_MAX: f64 = 1.30;

/// Parameters for the overlap-correlate stretcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StretchParams {
    pub sample_rate: u32,
    /// Analysis window length in ms.
    pub window_ms: u64,
    /// Crossfade overlap length in ms.
    pub overlap_ms: u64,
    /// Correlation search radius in ms.
    pub search_ms: u64,
}

impl Default for StretchParams {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_ms: 30,
            overlap_ms: 10,
            search_ms: 5,
        }
    }
}

/// Overlap-correlate-and-blend time stretcher.
///
/// Stateless between buffers: each inbound segment is stretched
/// independently, which keeps the render path allocation-bounded and avoids
/// carrying correlation state across phrase boundaries.
#[derive(Debug)]
pub struct MacroStretcher {
    window: usize,
    overlap: usize,
    search: usize,
}

impl MacroStretcher {
    pub fn new(params: StretchParams) -> Self {
        let per_ms = (params.sample_rate / 1_000).max(1) as usize;
        Self {
            window: per_ms * params.window_ms as usize,
            overlap: per_ms * params.overlap_ms as usize,
            search: per_ms * params.search_ms as usize,
        }
    }

    /// Compress `input` in time by `factor` (>= 1.0), preserving pitch.
    ///
    /// Factors at or near 1.0, and inputs shorter than one analysis window,
    /// pass through unchanged.
    pub fn process(&self, input: &[f32], factor: f64) -> Vec<f32> {
        let n = self.window;
        let l = self.overlap;
        if factor <= 1.001 || input.len() < n + self.search + l {
            return input.to_vec();
        }

        let hop_out = n - l;
        let hop_in = (hop_out as f64 * factor).round() as usize;

        let mut out = Vec::with_capacity((input.len() as f64 / factor) as usize + n);
        out.extend_from_slice(&input[..n]);

        let mut k = 1usize;
        loop {
            let nominal = k * hop_in;
            if nominal + self.search + n > input.len() {
                break;
            }
            let lo = nominal.saturating_sub(self.search);
            let hi = nominal + self.search;
            let best = best_offset(&out[out.len() - l..], input, lo, hi);
            crossfade_tail(&mut out, &input[best..best + l]);
            out.extend_from_slice(&input[best + l..best + n]);
            k += 1;
        }

        // Final partial window: the leftover input past the last full hop
        // still has to play, or every segment loses its ending. Crossfade at
        // the best offset the remaining range allows and emit through the
        // end of the input.
        let nominal = (k * hop_in).min(input.len() - l);
        let hi = (nominal + self.search).min(input.len() - l);
        let lo = nominal.saturating_sub(self.search).min(hi);
        let best = best_offset(&out[out.len() - l..], input, lo, hi);
        crossfade_tail(&mut out, &input[best..best + l]);
        out.extend_from_slice(&input[best + l..]);

        out
    }
}

/// The analysis offset in `lo..=hi` whose head best matches `tail`, so the
/// crossfade lands on aligned pitch periods.
fn best_offset(tail: &[f32], input: &[f32], lo: usize, hi: usize) -> usize {
    let l = tail.len();
    let mut best = lo;
    let mut best_score = f64::NEG_INFINITY;
    for cand in lo..=hi {
        let score = normalized_correlation(tail, &input[cand..cand + l]);
        if score > best_score {
            best_score = score;
            best = cand;
        }
    }
    best
}

/// Linear crossfade of `head` over the last `head.len()` output samples.
fn crossfade_tail(out: &mut [f32], head: &[f32]) {
    let l = head.len();
    let start = out.len() - l;
    for (i, &h) in head.iter().enumerate() {
        let fade = i as f32 / l as f32;
        out[start + i] = out[start + i] * (1.0 - fade) + h * fade;
    }
}

fn normalized_correlation(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        na += x as f64 * x as f64;
        nb += y as f64 * y as f64;
    }
    let denom = (na * nb).sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

/// Interpolation-based micro rate smoother.
///
/// Reads its input at a fractional step (the applied micro rate), linearly
/// interpolating between samples. Carries its fractional read position
/// across calls so chunk boundaries stay seamless.
#[derive(Debug, Default)]
pub struct MicroSmoother {
    buf: Vec<f32>,
    pos: f64,
}

impl MicroSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `input` at the given rate, emitting interpolated samples.
    pub fn process(&mut self, input: &[f32], rate: f64) -> Vec<f32> {
        self.buf.extend_from_slice(input);
        let rate = rate.max(0.5);

        let mut out = Vec::with_capacity((self.buf.len() as f64 / rate) as usize + 1);
        while (self.pos as usize) + 1 < self.buf.len() {
            let i = self.pos as usize;
            let frac = (self.pos - i as f64) as f32;
            out.push(self.buf[i] * (1.0 - frac) + self.buf[i + 1] * frac);
            self.pos += rate;
        }

        // Drop fully consumed samples, keeping one for interpolation.
        let consumed = (self.pos as usize).min(self.buf.len().saturating_sub(1));
        self.buf.drain(..consumed);
        self.pos -= consumed as f64;
        out
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0.0;
    }
}
