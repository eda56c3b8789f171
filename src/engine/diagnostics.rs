// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Point-in-time engine diagnostics.
//!
//! A flat, serializable snapshot of every control surface, taken on demand
//! from the engine's own state. Cheap enough to sample on every tick for a
//! live debug overlay.

use serde::Serialize;

use crate::flow::persona::PersonaTier;
use crate::latency::LatencyEstimate;
use crate::segmentation::escalation::EscalationStage;
use crate::session::SessionState;

/// A point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    // -- Segmentation ----------------------------------------------------------
    /// Whether the local speaker is currently mid-utterance.
    pub speaking: bool,
    /// Continuous speaking duration in ms, zero when silent.
    pub speaking_ms: u64,
    /// The silence threshold currently in effect.
    pub active_threshold_ms: u64,
    pub escalation_stage: EscalationStage,

    // -- Flow control ----------------------------------------------------------
    pub shield_active: bool,
    pub shield_remaining_ms: u64,
    pub dam_chunks: usize,
    pub dam_ms: u64,

    // -- Turn queue --------------------------------------------------------------
    pub pending_turns: usize,
    pub in_flight_turns: usize,

    // -- Playback ----------------------------------------------------------------
    /// Queued inbound playback duration.
    pub jitter_ms: u64,
    /// Smoothed elastic playback rate.
    pub playback_rate: f64,
    /// Last applied pitch-preserving stretch factor.
    pub macro_factor: f64,

    // -- Remote ------------------------------------------------------------------
    pub persona_tier: PersonaTier,
    pub session_state: SessionState,
    /// Response time of the most recently completed turn, in ms.
    pub last_response_ms: Option<f64>,
    /// Current latency model.
    pub latency: LatencyEstimate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes_to_json() {
        let snapshot = DiagnosticsSnapshot {
            speaking: true,
            speaking_ms: 1_200,
            active_threshold_ms: 275,
            escalation_stage: EscalationStage::Idle,
            shield_active: true,
            shield_remaining_ms: 3_000,
            dam_chunks: 2,
            dam_ms: 1_400,
            pending_turns: 2,
            in_flight_turns: 1,
            jitter_ms: 800,
            playback_rate: 1.07,
            macro_factor: 1.05,
            persona_tier: PersonaTier::Fast,
            session_state: SessionState::Connected,
            last_response_ms: Some(2_150.0),
            latency: LatencyEstimate::cold_start(),
        };
        let json = serde_json::to_string(&snapshot).expect("serialize");
        assert!(json.contains("\"speaking\":true"));
        assert!(json.contains("\"persona_tier\":\"Fast\""));
        assert!(json.contains("\"session_state\":\"Connected\""));
    }
}
