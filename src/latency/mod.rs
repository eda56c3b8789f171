// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Adaptive latency prediction.
//!
//! Maintains a bounded history of `(input duration, total response time)`
//! samples and fits an ordinary-least-squares line over them. The resulting
//! model seeds the shield's busy window the instant a turn is dispatched,
//! before any real timing data exists for that turn.
//!
//! Below the cold-start sample count the model is a fixed conservative
//! estimate, independent of whatever history content exists. Once warm, the
//! slope is clamped to a sane expansion range, the intercept is floored, and
//! a margin of two residual standard deviations is added on top of every
//! prediction.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Fixed cold-start expansion rate (response ms per input ms).
const COLD_START_SLOPE: f64 = 1.2;
/// Fixed cold-start overhead in ms.
const COLD_START_INTERCEPT_MS: f64 = 1_500.0;
/// Fixed cold-start safety margin in ms.
const COLD_START_MARGIN_MS: f64 = 3_000.0;

/// Slope clamp range.
const SLOPE_MIN: f64 = 0.5;
const SLOPE_MAX: f64 = 3.0;
/// Intercept floor in ms.
const INTERCEPT_FLOOR_MS: f64 = 200.0;

/// A fitted (or cold-start) latency model snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyEstimate {
    /// Expansion rate: response ms per input ms.
    pub slope: f64,
    /// Fixed overhead in ms.
    pub intercept_ms: f64,
    /// Variance-based safety margin in ms.
    pub margin_ms: f64,
    /// Confidence in `[0.0, 1.0]`, scaling with history size.
    pub confidence: f64,
}

impl LatencyEstimate {
    /// The fixed conservative model served during cold start.
    pub fn cold_start() -> Self {
        Self {
            slope: COLD_START_SLOPE,
            intercept_ms: COLD_START_INTERCEPT_MS,
            margin_ms: COLD_START_MARGIN_MS,
            confidence: 0.0,
        }
    }

    /// Predicted total response time for the given input duration.
    pub fn predict_ms(&self, input_ms: f64) -> f64 {
        input_ms * self.slope + self.intercept_ms + self.margin_ms
    }
}

/// Latency model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyParams {
    /// Ring buffer capacity.
    pub history_cap: usize,
    /// Below this many samples, the cold-start model is served.
    pub cold_start_samples: usize,
}

impl Default for LatencyParams {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl LatencyParams {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            history_cap: cfg.latency_history_cap,
            cold_start_samples: cfg.latency_cold_start_samples,
        }
    }
}

/// Online latency regression over a capped rolling history.
#[derive(Debug)]
pub struct LatencyModel {
    params: LatencyParams,
    /// `(input_ms, response_ms)` pairs, oldest first.
    samples: VecDeque<(f64, f64)>,
}

impl LatencyModel {
    pub fn new(params: LatencyParams) -> Self {
        Self {
            params,
            samples: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a completed-turn sample, evicting the oldest past capacity.
    pub fn record_sample(&mut self, input_ms: f64, response_ms: f64) {
        if !input_ms.is_finite() || !response_ms.is_finite() || input_ms < 0.0 {
            tracing::warn!(input_ms, response_ms, "discarding non-finite latency sample");
            return;
        }
        if self.samples.len() >= self.params.history_cap {
            self.samples.pop_front();
        }
        self.samples.push_back((input_ms, response_ms));
    }

    /// The current model: cold-start fixed estimates until enough samples
    /// exist, OLS thereafter.
    pub fn current_model(&self) -> LatencyEstimate {
        let n = self.samples.len();
        if n < self.params.cold_start_samples {
            return LatencyEstimate::cold_start();
        }

        let nf = n as f64;
        let mean_x = self.samples.iter().map(|(x, _)| x).sum::<f64>() / nf;
        let mean_y = self.samples.iter().map(|(_, y)| y).sum::<f64>() / nf;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for &(x, y) in &self.samples {
            sxx += (x - mean_x) * (x - mean_x);
            sxy += (x - mean_x) * (y - mean_y);
        }

        // Degenerate x variance (all inputs the same length): OLS slope is
        // undefined, so fall back to the ratio estimator before clamping.
        let raw_slope = if sxx > f64::EPSILON {
            sxy / sxx
        } else if mean_x > f64::EPSILON {
            mean_y / mean_x
        } else {
            COLD_START_SLOPE
        };
        let slope = raw_slope.clamp(SLOPE_MIN, SLOPE_MAX);
        let intercept_ms = (mean_y - slope * mean_x).max(INTERCEPT_FLOOR_MS);

        let mut residual_sq = 0.0;
        for &(x, y) in &self.samples {
            let r = y - (x * slope + intercept_ms);
            residual_sq += r * r;
        }
        let margin_ms = 2.0 * (residual_sq / nf).sqrt();

        let confidence = (nf / self.params.history_cap as f64).min(1.0);

        LatencyEstimate {
            slope,
            intercept_ms,
            margin_ms,
            confidence,
        }
    }

    /// Predicted total response time for a new turn of `input_ms`.
    pub fn predict_ms(&self, input_ms: f64) -> f64 {
        self.current_model().predict_ms(input_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_is_independent_of_history_content() {
        let mut a = LatencyModel::new(LatencyParams::default());
        let mut b = LatencyModel::new(LatencyParams::default());
        a.record_sample(100.0, 10_000.0);
        a.record_sample(200.0, 50.0);
        b.record_sample(9_000.0, 9_000.0);

        let ma = a.current_model();
        let mb = b.current_model();
        assert_eq!(ma, mb);
        assert_eq!(ma, LatencyEstimate::cold_start());
        assert!((ma.confidence - 0.0).abs() < f64::EPSILON);
        assert!((a.predict_ms(1_000.0) - (1_000.0 * 1.2 + 1_500.0 + 3_000.0)).abs() < 1e-9);
    }

    #[test]
    fn test_fits_clean_linear_data() {
        let mut m = LatencyModel::new(LatencyParams::default());
        // y = 1.5x + 800, exactly linear.
        for i in 1..=10 {
            let x = 500.0 * i as f64;
            m.record_sample(x, 1.5 * x + 800.0);
        }
        let est = m.current_model();
        assert!((est.slope - 1.5).abs() < 1e-9);
        assert!((est.intercept_ms - 800.0).abs() < 1e-6);
        assert!(est.margin_ms < 1e-6);
        assert!((est.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_identical_samples_are_deterministic() {
        // 20 identical (1000, 2000) samples: zero x-variance.
        let mut m = LatencyModel::new(LatencyParams::default());
        for _ in 0..20 {
            m.record_sample(1_000.0, 2_000.0);
        }
        let est = m.current_model();
        assert!((est.confidence - 1.0).abs() < f64::EPSILON);
        // Ratio estimator: slope 2.0, intercept floored at 200, no residuals.
        assert!((est.slope - 2.0).abs() < 1e-9);
        assert!((est.intercept_ms - 200.0).abs() < 1e-9);

        let p1 = m.predict_ms(1_000.0);
        let p2 = m.predict_ms(1_000.0);
        assert!((p1 - p2).abs() < f64::EPSILON, "prediction must be reproducible");
        assert!(p1 > 2_000.0, "prediction should stay conservative");
    }

    #[test]
    fn test_slope_clamped() {
        let mut m = LatencyModel::new(LatencyParams::default());
        // Absurdly steep data: y = 10x.
        for i in 1..=10 {
            let x = 100.0 * i as f64;
            m.record_sample(x, 10.0 * x);
        }
        assert!((m.current_model().slope - SLOPE_MAX).abs() < f64::EPSILON);

        // Inverted data: response shrinks as input grows.
        let mut m = LatencyModel::new(LatencyParams::default());
        for i in 1..=10 {
            let x = 100.0 * i as f64;
            m.record_sample(x, 5_000.0 - x);
        }
        assert!((m.current_model().slope - SLOPE_MIN).abs() < f64::EPSILON);
    }

    #[test]
    fn test_intercept_floor() {
        let mut m = LatencyModel::new(LatencyParams::default());
        // y = x exactly: intercept 0, floored to 200.
        for i in 1..=10 {
            let x = 500.0 * i as f64;
            m.record_sample(x, x);
        }
        let est = m.current_model();
        assert!((est.intercept_ms - INTERCEPT_FLOOR_MS).abs() < f64::EPSILON);
    }

    #[test]
    fn test_history_is_capped() {
        let mut m = LatencyModel::new(LatencyParams {
            history_cap: 20,
            cold_start_samples: 5,
        });
        for i in 0..50 {
            m.record_sample(1_000.0 + i as f64, 2_000.0);
        }
        assert_eq!(m.len(), 20);
    }

    #[test]
    fn test_noisy_data_produces_margin() {
        let mut m = LatencyModel::new(LatencyParams::default());
        // y = 2x + 1000 with alternating +/-300 noise.
        for i in 1..=20 {
            let x = 250.0 * i as f64;
            let noise = if i % 2 == 0 { 300.0 } else { -300.0 };
            m.record_sample(x, 2.0 * x + 1_000.0 + noise);
        }
        let est = m.current_model();
        assert!(est.margin_ms > 400.0, "margin {} should reflect residual spread", est.margin_ms);
        assert!(est.margin_ms < 1_000.0);
    }

    #[test]
    fn test_non_finite_samples_rejected() {
        let mut m = LatencyModel::new(LatencyParams::default());
        m.record_sample(f64::NAN, 100.0);
        m.record_sample(100.0, f64::INFINITY);
        m.record_sample(-5.0, 100.0);
        assert!(m.is_empty());
    }
}
