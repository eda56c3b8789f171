// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Persona speed tiers.
//!
//! A discrete speed directive derived from the *combined* backlog (Dam
//! duration estimate plus jitter-buffer duration) and pushed to the remote
//! model as a one-shot text instruction, only on change. Faster remote
//! speech reduces backlog growth at the source, complementing the local
//! elastic playback.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Remote speech-speed directive tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PersonaTier {
    /// Conversational pace.
    #[default]
    Normal,
    /// Noticeably brisk; backlog is building.
    Fast,
    /// Maximum pace; backlog is severe.
    Rocket,
}

impl fmt::Display for PersonaTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Fast => write!(f, "FAST"),
            Self::Rocket => write!(f, "ROCKET"),
        }
    }
}

impl PersonaTier {
    /// The one-shot instruction text pushed to the remote on a tier change.
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Normal => "Speak at a natural, relaxed pace.",
            Self::Fast => "Speak noticeably faster and keep pauses short.",
            Self::Rocket => "Speak as fast as you can while staying intelligible.",
        }
    }
}

/// Persona thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PersonaParams {
    /// Combined backlog at which FAST starts.
    pub fast_ms: u64,
    /// Combined backlog at which ROCKET starts.
    pub rocket_ms: u64,
}

impl Default for PersonaParams {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl PersonaParams {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            fast_ms: cfg.persona_fast_ms,
            rocket_ms: cfg.persona_rocket_ms,
        }
    }

    /// Tier for a combined backlog duration.
    pub fn tier_for(&self, combined_backlog_ms: u64) -> PersonaTier {
        if combined_backlog_ms >= self.rocket_ms {
            PersonaTier::Rocket
        } else if combined_backlog_ms >= self.fast_ms {
            PersonaTier::Fast
        } else {
            PersonaTier::Normal
        }
    }
}

/// Tracks the current tier and reports changes exactly once.
#[derive(Debug, Default)]
pub struct PersonaTracker {
    params: PersonaParams,
    current: PersonaTier,
}

impl PersonaTracker {
    pub fn new(params: PersonaParams) -> Self {
        Self {
            params,
            current: PersonaTier::Normal,
        }
    }

    pub fn current(&self) -> PersonaTier {
        self.current
    }

    pub fn set_params(&mut self, params: PersonaParams) {
        self.params = params;
    }

    /// Update from the combined backlog. Returns the new tier only when it
    /// changed, so the caller can push a one-shot instruction.
    pub fn update(&mut self, combined_backlog_ms: u64) -> Option<PersonaTier> {
        let tier = self.params.tier_for(combined_backlog_ms);
        if tier != self.current {
            tracing::debug!(from = %self.current, to = %tier, combined_backlog_ms, "persona tier change");
            self.current = tier;
            Some(tier)
        } else {
            None
        }
    }
}
