// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Turn bookkeeping.
//!
//! A [`Turn`] is a finalized user utterance, immutable once created. The
//! [`TurnQueue`] tracks turns from finalization to remote acknowledgement:
//! *pending* (not yet transmitted, e.g. held behind the Dam) and *in-flight*
//! (transmitted, awaiting a remote turn-complete). Completions confirm FIFO.
//! Turns that never receive a completion signal are garbage-collected after
//! a ghost timeout without raising an error; the remote may simply have
//! dropped the socket.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A finalized user utterance.
///
/// Immutable once created; owned by the [`TurnQueue`] until acknowledged.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Unique monotonic id.
    pub id: u64,
    /// Raw PCM16 audio payload, including the natural trailing pause.
    pub audio: Vec<u8>,
    /// When the utterance started.
    pub captured_at: Instant,
    /// Utterance duration in milliseconds.
    pub duration_ms: u64,
    /// Segmentation confidence. Fixed at 1.0 in practice.
    pub confidence: f64,
}

/// A dispatched turn awaiting remote completion.
#[derive(Debug, Clone)]
struct InFlightTurn {
    id: u64,
    dispatched_at: Instant,
    input_ms: u64,
}

/// A confirmed completion, yielding a sample for the latency model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionSample {
    pub turn_id: u64,
    /// Input (utterance) duration in ms.
    pub input_ms: f64,
    /// Total time from dispatch to remote turn-complete, in ms.
    pub response_ms: f64,
}

/// Tracks pending and in-flight turns.
///
/// Invariant: a turn id appears in at most one of {pending, in-flight}.
#[derive(Debug)]
pub struct TurnQueue {
    pending: VecDeque<Turn>,
    in_flight: VecDeque<InFlightTurn>,
    ghost_timeout: Duration,
}

impl TurnQueue {
    pub fn new(ghost_timeout: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
            ghost_timeout,
        }
    }

    /// Queue a finalized turn that has not been transmitted yet.
    pub fn push_pending(&mut self, turn: Turn) {
        self.pending.push_back(turn);
    }

    /// Pop the oldest pending turn for transmission.
    pub fn pop_pending(&mut self) -> Option<Turn> {
        self.pending.pop_front()
    }

    /// Record that a turn has been transmitted and now awaits completion.
    pub fn mark_in_flight(&mut self, turn: &Turn, now: Instant) {
        debug_assert!(
            !self.pending.iter().any(|t| t.id == turn.id),
            "turn must not be both pending and in-flight"
        );
        self.in_flight.push_back(InFlightTurn {
            id: turn.id,
            dispatched_at: now,
            input_ms: turn.duration_ms,
        });
    }

    /// Move every pending turn to in-flight, oldest first, returning them
    /// for transmission. Used when the Dam releases a burst.
    pub fn dispatch_all_pending(&mut self, now: Instant) -> Vec<Turn> {
        let turns: Vec<Turn> = self.pending.drain(..).collect();
        for turn in &turns {
            self.in_flight.push_back(InFlightTurn {
                id: turn.id,
                dispatched_at: now,
                input_ms: turn.duration_ms,
            });
        }
        turns
    }

    /// Confirm the oldest in-flight turn as complete.
    ///
    /// Completions are matched FIFO because the remote processes turns in
    /// order. Returns the latency sample, or `None` when nothing is
    /// in flight (a completion for an already-ghosted turn).
    pub fn confirm_completion(&mut self, now: Instant) -> Option<CompletionSample> {
        self.in_flight.pop_front().map(|t| CompletionSample {
            turn_id: t.id,
            input_ms: t.input_ms as f64,
            response_ms: now.saturating_duration_since(t.dispatched_at).as_millis() as f64,
        })
    }

    /// Purge entries older than the ghost timeout. No side effects: ghosts
    /// are treated as lost, not as errors.
    pub fn collect_ghosts(&mut self, now: Instant) -> usize {
        let timeout = self.ghost_timeout;
        let before = self.pending.len() + self.in_flight.len();
        self.pending
            .retain(|t| now.saturating_duration_since(t.captured_at) < timeout);
        self.in_flight
            .retain(|t| now.saturating_duration_since(t.dispatched_at) < timeout);
        let purged = before - (self.pending.len() + self.in_flight.len());
        if purged > 0 {
            tracing::debug!(purged, "ghost turns collected");
        }
        purged
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}
