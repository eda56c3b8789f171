// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Staged silence escalation ("puppeteer" protocol).
//!
//! A secondary timer started at silence onset, independent of the
//! segmentation threshold. It keeps the conversation alive during
//! unexpectedly long gaps without cutting the turn early:
//!
//! - 1.5 s of silence -> ask the remote to repeat its last utterance.
//! - 3.0 s -> inject a short language-appropriate filler phrase.
//! - 5.0 s -> cut: force-finalize the turn regardless of the segmentation
//!   threshold.
//!
//! Stage progression is strictly monotonic; the machine never regresses
//! except through a full [`reset`](SilenceEscalation::reset), which happens
//! the instant new speech is detected.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Escalation stages, in strictly increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EscalationStage {
    Idle,
    Repeat,
    Filler,
    Cut,
}

/// Actions requested by the escalation machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationAction {
    /// Send a synthetic "repeat your last utterance" signal to the remote.
    RepeatRequest,
    /// Send the given filler phrase to the remote.
    Filler(&'static str),
    /// Force-finalize the turn immediately.
    Cut,
}

/// Escalation timing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationParams {
    pub repeat_after_ms: u64,
    pub filler_after_ms: u64,
    pub cut_after_ms: u64,
    /// Primary language tag for filler phrase selection (e.g. `"es"`).
    pub language: String,
}

impl Default for EscalationParams {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl EscalationParams {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            repeat_after_ms: cfg.repeat_after_ms,
            filler_after_ms: cfg.filler_after_ms,
            cut_after_ms: cfg.cut_after_ms,
            language: cfg.language.clone(),
        }
    }
}

/// Short filler phrase for the given primary language tag.
///
/// Falls back to English for unknown languages.
pub fn filler_phrase(language: &str) -> &'static str {
    let primary = language.split(['-', '_']).next().unwrap_or("en");
    match primary {
        "es" => "Un momento.",
        "fr" => "Un instant.",
        "de" => "Einen Moment.",
        "it" => "Un attimo.",
        "pt" => "Um momento.",
        "ja" => "\u{5c11}\u{3005}\u{304a}\u{5f85}\u{3061}\u{304f}\u{3060}\u{3055}\u{3044}\u{3002}",
        "zh" => "\u{8bf7}\u{7a0d}\u{7b49}\u{3002}",
        "ko" => "\u{c7a0}\u{c2dc}\u{b9cc}\u{c694}.",
        _ => "One moment.",
    }
}

/// The staged silence escalation machine.
#[derive(Debug)]
pub struct SilenceEscalation {
    params: EscalationParams,
    stage: EscalationStage,
}

impl SilenceEscalation {
    pub fn new(params: EscalationParams) -> Self {
        Self {
            params,
            stage: EscalationStage::Idle,
        }
    }

    pub fn stage(&self) -> EscalationStage {
        self.stage
    }

    pub fn set_params(&mut self, params: EscalationParams) {
        self.params = params;
    }

    /// Reset to `Idle`. Called the instant new speech is detected.
    pub fn reset(&mut self) {
        self.stage = EscalationStage::Idle;
    }

    /// Advance the machine given the current silence onset, if any.
    ///
    /// `silence_since` is `None` when the speaker is voiced or the gap has
    /// been closed by a remote response, which resets the machine. The
    /// anchor outlives turn finalization, so the stages keep firing into
    /// the same silence even after the threshold emitted a Turn. At most
    /// one action is returned per call; the cut check runs first so a large
    /// time jump lands on `Cut` directly from any stage.
    pub fn poll(&mut self, now: Instant, silence_since: Option<Instant>) -> Option<EscalationAction> {
        let onset = match silence_since {
            Some(t) => t,
            None => {
                self.stage = EscalationStage::Idle;
                return None;
            }
        };
        let silence_ms = now.saturating_duration_since(onset).as_millis() as u64;

        if silence_ms > self.params.cut_after_ms && self.stage < EscalationStage::Cut {
            self.stage = EscalationStage::Cut;
            tracing::debug!(silence_ms, "escalation: cutting turn");
            return Some(EscalationAction::Cut);
        }
        if silence_ms > self.params.filler_after_ms && self.stage == EscalationStage::Repeat {
            self.stage = EscalationStage::Filler;
            let phrase = filler_phrase(&self.params.language);
            tracing::debug!(silence_ms, phrase, "escalation: injecting filler");
            return Some(EscalationAction::Filler(phrase));
        }
        if silence_ms > self.params.repeat_after_ms && self.stage == EscalationStage::Idle {
            self.stage = EscalationStage::Repeat;
            tracing::debug!(silence_ms, "escalation: requesting repeat");
            return Some(EscalationAction::RepeatRequest);
        }
        None
    }
}
