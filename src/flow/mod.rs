// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Shield/Dam flow control.
//!
//! The Shield is the gate that withholds outbound audio while the remote
//! model might still be responding; the Dam is the FIFO buffer of withheld
//! chunks. The shield owns a single `busy_until` timestamp:
//!
//! - Raised on turn dispatch, sized by the latency prediction model.
//! - Extended by a short rolling margin on every inbound audio packet
//!   ("the remote is still talking, stay shielded").
//! - Cleared on remote turn-complete once the local playback backlog is low
//!   enough that echo risk is acceptable; otherwise held until the backlog
//!   drains, checked on the engine tick. Every turn-complete clear applies a
//!   mandatory "deep breath" hold so the gate does not reopen before the
//!   remote's VAD has settled.
//!
//! On release the entire Dam is flushed as one contiguous burst (never
//! partially), followed by a short silence pad and the deferred end-of-turn
//! signal if one was pending, stitching the buffered speech onto the stream
//! without starting a new remote turn.

pub mod persona;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::audio::utils::pcm16_duration_ms;
use crate::config::EngineConfig;

/// Flow-control parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowParams {
    /// Busy window used when the latency model is cold.
    pub cold_start_busy_ms: u64,
    /// Rolling extension applied per inbound audio packet.
    pub inbound_extend_ms: u64,
    /// Mandatory hold after a turn-complete clear.
    pub deep_breath_ms: u64,
    /// Silence pad appended after a Dam flush.
    pub flush_pad_ms: u64,
    pub sample_rate: u32,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl FlowParams {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            cold_start_busy_ms: cfg.cold_start_busy_ms,
            inbound_extend_ms: cfg.inbound_extend_ms,
            deep_breath_ms: cfg.deep_breath_ms,
            flush_pad_ms: cfg.flush_pad_ms,
            sample_rate: cfg.sample_rate,
        }
    }
}

/// An atomic Dam release: every withheld chunk in push order, a silence pad,
/// and whether an end-of-turn signal was pending.
#[derive(Debug)]
pub struct DamFlush {
    pub chunks: Vec<Vec<u8>>,
    pub silence_pad: Vec<u8>,
    pub end_of_turn: bool,
}

/// The Shield/Dam controller.
#[derive(Debug)]
pub struct FlowController {
    params: FlowParams,
    /// Shield is active iff `now < busy_until`.
    busy_until: Option<Instant>,
    dam: VecDeque<Vec<u8>>,
    dam_bytes: usize,
    /// An end-of-turn signal was deferred while the shield was active.
    pending_end_of_turn: bool,
    /// Turn-complete arrived but the local backlog was still too high.
    awaiting_drain: bool,
}

impl FlowController {
    pub fn new(params: FlowParams) -> Self {
        Self {
            params,
            busy_until: None,
            dam: VecDeque::new(),
            dam_bytes: 0,
            pending_end_of_turn: false,
            awaiting_drain: false,
        }
    }

    pub fn set_params(&mut self, params: FlowParams) {
        self.params = params;
    }

    /// Whether the shield currently withholds outbound audio.
    pub fn is_active(&self, now: Instant) -> bool {
        matches!(self.busy_until, Some(t) if now < t)
    }

    /// Remaining shield time in ms, zero when inactive.
    pub fn remaining_ms(&self, now: Instant) -> u64 {
        self.busy_until
            .map(|t| t.saturating_duration_since(now).as_millis() as u64)
            .unwrap_or(0)
    }

    /// A turn was transmitted: raise the shield for the predicted response
    /// window.
    pub fn on_turn_dispatched(&mut self, now: Instant, predicted_busy_ms: u64) {
        let until = now + Duration::from_millis(predicted_busy_ms);
        self.busy_until = Some(match self.busy_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        tracing::debug!(predicted_busy_ms, "shield raised on dispatch");
    }

    /// An inbound audio packet arrived: the remote is still talking, keep
    /// the shield up for a short rolling window.
    pub fn on_inbound_audio(&mut self, now: Instant) {
        let extend = now + Duration::from_millis(self.params.inbound_extend_ms);
        self.busy_until = Some(match self.busy_until {
            Some(existing) if existing > extend => existing,
            _ => extend,
        });
    }

    /// The remote signalled turn-complete.
    ///
    /// Clears immediately (with the deep-breath hold) when the local
    /// playback backlog is already low; otherwise waits for the tick to
    /// observe a drained backlog.
    pub fn on_remote_turn_complete(&mut self, now: Instant, backlog_low: bool) -> Option<DamFlush> {
        if backlog_low {
            self.clear_with_hold(now)
        } else {
            self.awaiting_drain = true;
            None
        }
    }

    /// Gate one outbound chunk. Returns the chunk back when the shield is
    /// open (caller transmits it); appends it to the Dam otherwise.
    pub fn gate_outbound(&mut self, now: Instant, chunk: Vec<u8>) -> Option<Vec<u8>> {
        if self.is_active(now) {
            self.dam_bytes += chunk.len();
            self.dam.push_back(chunk);
            None
        } else {
            Some(chunk)
        }
    }

    /// Defer the end-of-turn signal until the next Dam flush.
    pub fn defer_end_of_turn(&mut self) {
        self.pending_end_of_turn = true;
    }

    /// Periodic check, run on the engine tick.
    ///
    /// Completes a deferred turn-complete clear once the backlog has
    /// drained, and flushes the Dam when the shield has lapsed on its own
    /// (the predicted window passed with no remote activity).
    pub fn poll_release(&mut self, now: Instant, backlog_low: bool) -> Option<DamFlush> {
        if self.awaiting_drain && backlog_low {
            self.awaiting_drain = false;
            return self.clear_with_hold(now);
        }
        if !self.is_active(now) && (!self.dam.is_empty() || self.pending_end_of_turn) {
            self.busy_until = None;
            return self.take_flush();
        }
        None
    }

    /// Estimated duration of audio held in the Dam.
    pub fn dam_duration_ms(&self) -> u64 {
        pcm16_duration_ms(self.dam_bytes, self.params.sample_rate)
    }

    pub fn dam_len(&self) -> usize {
        self.dam.len()
    }

    /// Drop all flow state (disconnect).
    pub fn reset(&mut self) {
        self.busy_until = None;
        self.dam.clear();
        self.dam_bytes = 0;
        self.pending_end_of_turn = false;
        self.awaiting_drain = false;
    }

    fn clear_with_hold(&mut self, now: Instant) -> Option<DamFlush> {
        // The hold keeps the gate shut for fresh microphone audio, but the
        // withheld burst is stitched to the stream right now.
        self.busy_until = Some(now + Duration::from_millis(self.params.deep_breath_ms));
        tracing::debug!(hold_ms = self.params.deep_breath_ms, "shield cleared, deep breath");
        self.take_flush()
    }

    fn take_flush(&mut self) -> Option<DamFlush> {
        if self.dam.is_empty() && !self.pending_end_of_turn {
            return None;
        }
        let chunks: Vec<Vec<u8>> = self.dam.drain(..).collect();
        self.dam_bytes = 0;
        let end_of_turn = std::mem::take(&mut self.pending_end_of_turn);
        let pad_bytes = (self.params.sample_rate as usize / 1_000)
            * self.params.flush_pad_ms as usize
            * 2;
        tracing::debug!(chunks = chunks.len(), end_of_turn, "dam flushed");
        Some(DamFlush {
            chunks,
            silence_pad: vec![0u8; pad_bytes],
            end_of_turn,
        })
    }
}
