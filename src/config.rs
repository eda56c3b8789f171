// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Engine configuration.
//!
//! All tunables live in a single immutable [`EngineConfig`] value. The engine
//! reads the configuration by value on each tick; consumers swap the whole
//! struct atomically (see [`crate::engine::EngineRuntime`]) rather than
//! mutating individual fields in place.

use serde::{Deserialize, Serialize};

/// Complete engine configuration.
///
/// Durations are expressed in milliseconds throughout so the struct can be
/// serialized and diffed trivially.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // -- Audio format ---------------------------------------------------------
    /// Sample rate of both capture and playback PCM16 audio, in Hz.
    pub sample_rate: u32,
    /// Number of audio channels (the engine is mono in practice).
    pub num_channels: u32,

    // -- Segmentation ---------------------------------------------------------
    /// Speech probability required to enter the `Speaking` state.
    pub enter_probability: f64,
    /// Multiplier applied to `enter_probability` once already speaking, so a
    /// dip in a sustained utterance does not prematurely end it.
    pub hysteresis_factor: f64,
    /// Configured base silence threshold in ms.
    pub silence_base_ms: u64,
    /// Low fixed floor used when there is no backlog pressure at all
    /// (fast turnaround).
    pub silence_floor_ms: u64,
    /// Cap applied to the doubled threshold under Dam pressure.
    pub silence_cap_ms: u64,
    /// Relaxed silence tolerance granted during a sustained monologue.
    pub ghost_tolerance_ms: u64,
    /// Continuous speaking duration after which momentum tolerance applies.
    pub momentum_start_ms: u64,
    /// Speaking duration at which the Squeeze ramp begins.
    pub squeeze_start_ms: u64,
    /// Hard floor the Squeeze ramps the threshold down to.
    pub squeeze_floor_ms: u64,
    /// Speaking duration at which a turn is force-finalized unconditionally.
    pub hard_cap_ms: u64,

    // -- Silence escalation ("puppeteer") --------------------------------------
    /// Silence duration after which a repeat request is injected.
    pub repeat_after_ms: u64,
    /// Silence duration after which a filler phrase is injected.
    pub filler_after_ms: u64,
    /// Silence duration after which the turn is cut unconditionally.
    pub cut_after_ms: u64,
    /// Primary language tag used to pick filler phrases.
    pub language: String,

    // -- Turn queue -------------------------------------------------------------
    /// Turns with no completion signal after this long are purged.
    pub ghost_timeout_ms: u64,

    // -- Shield / Dam -----------------------------------------------------------
    /// Conservative busy window used before the latency model warms up.
    pub cold_start_busy_ms: u64,
    /// Rolling shield extension applied on every inbound audio packet.
    pub inbound_extend_ms: u64,
    /// Mandatory hold applied after the shield clears.
    pub deep_breath_ms: u64,
    /// Engine tick period.
    pub tick_ms: u64,
    /// Playback backlog below which the shield may clear on turn-complete.
    pub drain_low_water_ms: u64,
    /// Silence pad appended after a Dam flush to stitch the burst cleanly.
    pub flush_pad_ms: u64,

    // -- Persona speed tiers ------------------------------------------------------
    /// Combined backlog at which the FAST tier starts.
    pub persona_fast_ms: u64,
    /// Combined backlog at which the ROCKET tier starts.
    pub persona_rocket_ms: u64,

    // -- Latency prediction ---------------------------------------------------------
    /// Maximum number of (input, response) samples retained.
    pub latency_history_cap: usize,
    /// Sample count below which the fixed cold-start model is served.
    pub latency_cold_start_samples: usize,

    // -- Playback scheduling -----------------------------------------------------
    /// Queued duration below which playback runs at 1.0x.
    pub rate_low_water_ms: u64,
    /// Queued duration at which the rate ramp reaches its cap.
    pub rate_high_water_ms: u64,
    /// Maximum smoothed playback rate (kept low to avoid audible pitch shift).
    pub rate_max: f64,
    /// Exponential approach factor toward the target rate, per tick.
    pub rate_smoothing: f64,
    /// Scheduling lookahead applied to each queued segment.
    pub lookahead_ms: u64,

    // -- Elastic rendering --------------------------------------------------------
    /// Upper bound on the micro-smoothing rate nudge (fraction, e.g. 0.02).
    pub micro_rate_max: f64,
    /// Sustained output silence after which hardware suspend is requested.
    pub suspend_after_ms: u64,

    // -- Session ---------------------------------------------------------------
    /// Initial reconnect backoff delay.
    pub reconnect_base_ms: u64,
    /// Reconnect backoff cap.
    pub reconnect_cap_ms: u64,
    /// Byte cap on audio buffered while the channel is still connecting.
    pub preconnect_buffer_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            num_channels: 1,

            enter_probability: 0.6,
            hysteresis_factor: 0.6,
            silence_base_ms: 275,
            silence_floor_ms: 140,
            silence_cap_ms: 900,
            ghost_tolerance_ms: 900,
            momentum_start_ms: 3_000,
            squeeze_start_ms: 20_000,
            squeeze_floor_ms: 100,
            hard_cap_ms: 25_000,

            repeat_after_ms: 1_500,
            filler_after_ms: 3_000,
            cut_after_ms: 5_000,
            language: "en".to_string(),

            ghost_timeout_ms: 5_000,

            cold_start_busy_ms: 4_000,
            inbound_extend_ms: 600,
            deep_breath_ms: 450,
            tick_ms: 50,
            drain_low_water_ms: 750,
            flush_pad_ms: 120,

            persona_fast_ms: 15_000,
            persona_rocket_ms: 25_000,

            latency_history_cap: 20,
            latency_cold_start_samples: 5,

            rate_low_water_ms: 400,
            rate_high_water_ms: 2_000,
            rate_max: 1.12,
            rate_smoothing: 0.1,
            lookahead_ms: 40,

            micro_rate_max: 0.02,
            suspend_after_ms: 3_000,

            reconnect_base_ms: 500,
            reconnect_cap_ms: 15_000,
            preconnect_buffer_bytes: 320_000,
        }
    }
}
