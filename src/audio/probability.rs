// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Speech probability source.
//!
//! The segmentation state machine consumes a per-frame probability that the
//! frame contains speech, plus the raw signal energy. Neural classifiers
//! (Silero-style) plug in behind [`SpeechProbabilitySource`]; the crate ships
//! a deterministic energy-based implementation that doubles as the default
//! and as the test mock. Classifier state lives entirely inside the
//! implementation and is reset on demand.

use serde::{Deserialize, Serialize};

use crate::audio::utils::{calculate_rms, exp_smoothing};

/// Per-frame classification result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechScore {
    /// Probability in `[0.0, 1.0]` that the frame contains speech.
    pub probability: f64,
    /// Normalized RMS energy of the frame in `[0.0, 1.0]`.
    pub energy: f64,
}

/// A per-frame speech classifier.
///
/// Implementations are free to keep arbitrary internal state (model weights,
/// recurrent state); [`reset`](SpeechProbabilitySource::reset) must return
/// them to their initial condition.
pub trait SpeechProbabilitySource: Send {
    /// Reset all internal state.
    fn reset(&mut self);

    /// Classify one PCM16 frame.
    fn process(&mut self, frame: &[u8]) -> SpeechScore;
}

/// Parameters for [`EnergyProbabilitySource`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyProbabilityParams {
    /// Energy at or below which probability is 0.
    pub noise_floor: f64,
    /// Energy at or above which probability is 1.
    pub speech_level: f64,
    /// Exponential smoothing factor applied to the energy envelope.
    pub smoothing: f64,
}

impl Default for EnergyProbabilityParams {
    fn default() -> Self {
        Self {
            noise_floor: 0.01,
            speech_level: 0.08,
            smoothing: 0.3,
        }
    }
}

/// Energy-based speech probability source.
///
/// Maps the exponentially smoothed RMS energy linearly between a noise floor
/// and a nominal speech level. Not a substitute for a neural classifier, but
/// deterministic, allocation-free, and good enough for tests and fallback
/// operation.
#[derive(Debug)]
pub struct EnergyProbabilitySource {
    params: EnergyProbabilityParams,
    envelope: f64,
}

impl EnergyProbabilitySource {
    pub fn new(params: EnergyProbabilityParams) -> Self {
        Self {
            params,
            envelope: 0.0,
        }
    }
}

impl Default for EnergyProbabilitySource {
    fn default() -> Self {
        Self::new(EnergyProbabilityParams::default())
    }
}

impl SpeechProbabilitySource for EnergyProbabilitySource {
    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn process(&mut self, frame: &[u8]) -> SpeechScore {
        let energy = calculate_rms(frame);
        self.envelope = exp_smoothing(energy, self.envelope, self.params.smoothing);

        let span = self.params.speech_level - self.params.noise_floor;
        let probability = if span <= 0.0 {
            if self.envelope > self.params.noise_floor { 1.0 } else { 0.0 }
        } else {
            ((self.envelope - self.params.noise_floor) / span).clamp(0.0, 1.0)
        };

        SpeechScore {
            probability,
            energy,
        }
    }
}
