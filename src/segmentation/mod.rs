// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Voice-activity-driven segmentation state machine.
//!
//! Consumes per-frame `(probability, energy)` scores and produces
//! speaking/silence transitions plus a finalized [`Turn`] when continuous
//! silence exceeds a dynamically computed threshold. The machine is pure
//! logic: callers pass the current [`Instant`] and the current backlog
//! pressure explicitly, so behavior is deterministic and testable.
//!
//! The silence threshold is not a fixed timeout. Per frame it is derived
//! from the flow-control state:
//!
//! - Dam has queued outbound audio -> `min(2 * base, cap)`. A burst is
//!   already waiting, so longer pauses are tolerated.
//! - Momentum (speaking longer than the momentum start) with no Dam
//!   pressure -> the longer "ghost tolerance", allowing natural breathing
//!   in monologues.
//! - Inbound jitter backlog but no Dam -> `base / 2`. The user is likely
//!   listening, not speaking.
//! - No pressure at all -> the low fixed floor (fast turnaround).
//!
//! Above the squeeze start (20 s of continuous speech) the computed
//! threshold ramps linearly down to a hard floor, and at the hard cap (25 s)
//! the turn is finalized unconditionally. The Squeeze overrides the momentum
//! tolerance when both apply.

pub mod escalation;

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::audio::probability::SpeechScore;
use crate::audio::utils::pcm16_duration_ms;
use crate::config::EngineConfig;
use crate::turns::Turn;
use crate::utils::obj_id;

/// Segmentation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Silent,
    Speaking,
}

/// Backlog pressure sampled by the caller on each frame.
///
/// Written by the flow controller and playback scheduler, read by value
/// here; last-write-wins consistency is sufficient.
#[derive(Debug, Clone, Copy, Default)]
pub struct BacklogPressure {
    /// Estimated duration of outbound audio held in the Dam.
    pub dam_ms: u64,
    /// Queued inbound playback duration.
    pub jitter_ms: u64,
}

/// Events emitted by the segmenter on completed transitions.
#[derive(Debug)]
pub enum SegmentEvent {
    /// No transition occurred.
    None,
    /// Transitioned from `Silent` to `Speaking`.
    SpeechStarted,
    /// A turn was finalized; the machine is back in `Silent`.
    TurnFinalized(Turn),
}

/// Segmentation parameters, lifted from the engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterParams {
    pub enter_probability: f64,
    pub hysteresis_factor: f64,
    pub silence_base_ms: u64,
    pub silence_floor_ms: u64,
    pub silence_cap_ms: u64,
    pub ghost_tolerance_ms: u64,
    pub momentum_start_ms: u64,
    pub squeeze_start_ms: u64,
    pub squeeze_floor_ms: u64,
    pub hard_cap_ms: u64,
}

impl Default for SegmenterParams {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SegmenterParams {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            enter_probability: cfg.enter_probability,
            hysteresis_factor: cfg.hysteresis_factor,
            silence_base_ms: cfg.silence_base_ms,
            silence_floor_ms: cfg.silence_floor_ms,
            silence_cap_ms: cfg.silence_cap_ms,
            ghost_tolerance_ms: cfg.ghost_tolerance_ms,
            momentum_start_ms: cfg.momentum_start_ms,
            squeeze_start_ms: cfg.squeeze_start_ms,
            squeeze_floor_ms: cfg.squeeze_floor_ms,
            hard_cap_ms: cfg.hard_cap_ms,
        }
    }
}

/// The segmentation state machine.
pub struct Segmenter {
    params: SegmenterParams,
    sample_rate: u32,
    state: SegmentState,
    /// Audio accumulated since entering `Speaking`.
    buffer: Vec<u8>,
    speaking_since: Option<Instant>,
    /// Onset of the current unvoiced gap while in `Speaking`.
    silence_since: Option<Instant>,
    /// Onset of the gap that finalized the last turn. Finalizing a turn does
    /// not end the speaker's silence, so this survives the turn boundary
    /// until new speech or a remote response closes the gap.
    gap_since: Option<Instant>,
}

impl Segmenter {
    pub fn new(params: SegmenterParams, sample_rate: u32) -> Self {
        Self {
            params,
            sample_rate,
            state: SegmentState::Silent,
            buffer: Vec::new(),
            speaking_since: None,
            silence_since: None,
            gap_since: None,
        }
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn params(&self) -> &SegmenterParams {
        &self.params
    }

    /// Replace the parameters without disturbing an in-progress utterance.
    pub fn set_params(&mut self, params: SegmenterParams) {
        self.params = params;
    }

    /// Onset of the current silence gap, if the speaker has gone quiet
    /// mid-turn.
    pub fn silence_since(&self) -> Option<Instant> {
        self.silence_since
    }

    /// Anchor for the silence escalation: the live mid-turn gap, or the gap
    /// that finalized the last turn while the speaker stays quiet.
    pub fn escalation_anchor(&self) -> Option<Instant> {
        self.silence_since.or(self.gap_since)
    }

    /// End the post-turn gap (the remote answered). A live mid-turn gap is
    /// untouched.
    pub fn close_gap(&mut self) {
        self.gap_since = None;
    }

    /// Continuous speaking duration in ms, zero when silent.
    pub fn speaking_ms(&self, now: Instant) -> u64 {
        self.speaking_since
            .map(|t| now.saturating_duration_since(t).as_millis() as u64)
            .unwrap_or(0)
    }

    /// The silence threshold in effect right now, given backlog pressure.
    ///
    /// Exposed for diagnostics as well as used internally.
    pub fn active_threshold_ms(&self, now: Instant, pressure: BacklogPressure) -> u64 {
        let p = &self.params;
        let mut threshold = if pressure.dam_ms > 0 {
            (p.silence_base_ms * 2).min(p.silence_cap_ms)
        } else if self.speaking_ms(now) > p.momentum_start_ms {
            p.ghost_tolerance_ms
        } else if pressure.jitter_ms > 0 {
            p.silence_base_ms / 2
        } else {
            p.silence_floor_ms
        };

        // The Squeeze: ramp toward the hard floor between squeeze start and
        // the hard cap. Takes effect regardless of momentum state.
        let speaking = self.speaking_ms(now);
        if speaking > p.squeeze_start_ms && p.hard_cap_ms > p.squeeze_start_ms {
            let span = (p.hard_cap_ms - p.squeeze_start_ms) as f64;
            let frac = ((speaking - p.squeeze_start_ms) as f64 / span).min(1.0);
            let ramped =
                threshold as f64 + (p.squeeze_floor_ms as f64 - threshold as f64) * frac;
            threshold = (ramped.round() as u64).max(p.squeeze_floor_ms);
        }

        threshold
    }

    /// Feed one scored PCM16 frame.
    ///
    /// While `Speaking` the frame audio (voiced or not) is appended to the
    /// turn buffer, so finalized turns include their natural trailing pause.
    pub fn process_frame(
        &mut self,
        now: Instant,
        score: SpeechScore,
        frame: &[u8],
        pressure: BacklogPressure,
    ) -> SegmentEvent {
        match self.state {
            SegmentState::Silent => {
                if score.probability > self.params.enter_probability {
                    self.state = SegmentState::Speaking;
                    self.speaking_since = Some(now);
                    self.silence_since = None;
                    self.gap_since = None;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(frame);
                    tracing::debug!(probability = score.probability, "speech started");
                    SegmentEvent::SpeechStarted
                } else {
                    SegmentEvent::None
                }
            }
            SegmentState::Speaking => {
                self.buffer.extend_from_slice(frame);

                // Hysteresis: a dip below the enter threshold does not end
                // the utterance; only the lowered threshold counts as silence.
                let voiced = score.probability
                    > self.params.enter_probability * self.params.hysteresis_factor;
                if voiced {
                    self.silence_since = None;
                } else if self.silence_since.is_none() {
                    self.silence_since = Some(now);
                }

                if self.speaking_ms(now) >= self.params.hard_cap_ms {
                    tracing::debug!("hard cap reached, force-finalizing turn");
                    return SegmentEvent::TurnFinalized(self.finalize(now));
                }

                if let Some(onset) = self.silence_since {
                    let silence_ms = now.saturating_duration_since(onset).as_millis() as u64;
                    if silence_ms >= self.active_threshold_ms(now, pressure) {
                        return SegmentEvent::TurnFinalized(self.finalize(now));
                    }
                }

                SegmentEvent::None
            }
        }
    }

    /// Force-finalize the in-progress turn, if any.
    ///
    /// Used by the escalation protocol's CUT stage, independent of the
    /// segmentation threshold.
    pub fn force_finalize(&mut self, now: Instant) -> Option<Turn> {
        if self.state == SegmentState::Speaking {
            Some(self.finalize(now))
        } else {
            None
        }
    }

    fn finalize(&mut self, now: Instant) -> Turn {
        let audio = std::mem::take(&mut self.buffer);
        let duration_ms = pcm16_duration_ms(audio.len(), self.sample_rate);
        let captured_at = self.speaking_since.unwrap_or(now);
        self.state = SegmentState::Silent;
        self.speaking_since = None;
        self.gap_since = self.silence_since.or(Some(now));
        self.silence_since = None;
        let turn = Turn {
            id: obj_id(),
            audio,
            captured_at,
            duration_ms,
            confidence: 1.0,
        };
        tracing::debug!(turn_id = turn.id, duration_ms, "turn finalized");
        turn
    }
}
