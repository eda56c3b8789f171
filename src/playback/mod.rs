// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Jitter buffer and elastic playback scheduler.
//!
//! Inbound decoded audio segments are queued FIFO, tagged with a logical
//! group id (one group per remote phrase; the id never affects scheduling
//! order). The scheduler runs on every render quantum: it computes the
//! queued duration, derives a target playback rate from it (1.0x below a
//! low-water mark, ramping linearly to a small cap, flat above), and
//! smooths the live rate toward the target with an exponential approach so
//! rate changes are inaudible.
//!
//! Each segment is scheduled at `max(strict_next, now + lookahead)`. After
//! the renderer plays a segment it reports the *realized* duration (raw
//! duration divided by the full stretch composition), and the whole schedule
//! moves earlier by the time saved, so faster playback compresses the
//! schedule and directly drains backlog.

pub mod renderer;
pub mod stretch;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// One queued inbound audio segment.
#[derive(Debug, Clone)]
pub struct JitterItem {
    /// Logical phrase id; ties consecutive segments together for anchoring.
    pub group_id: u64,
    /// Decoded mono samples.
    pub samples: Vec<f32>,
    /// Raw duration in ms at 1.0x.
    pub duration_ms: u64,
    /// Assigned start time.
    pub scheduled_at: Instant,
}

/// Scheduler parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerParams {
    pub sample_rate: u32,
    /// Queued duration below which the target rate is 1.0x.
    pub low_water_ms: u64,
    /// Queued duration at which the ramp reaches `max_rate`.
    pub high_water_ms: u64,
    /// Rate cap; kept small to avoid audible pitch/formant distortion.
    pub max_rate: f64,
    /// Exponential approach factor toward the target, per tick.
    pub smoothing: f64,
    /// Scheduling lookahead.
    pub lookahead_ms: u64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SchedulerParams {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            sample_rate: cfg.sample_rate,
            low_water_ms: cfg.rate_low_water_ms,
            high_water_ms: cfg.rate_high_water_ms,
            max_rate: cfg.rate_max,
            smoothing: cfg.rate_smoothing,
            lookahead_ms: cfg.lookahead_ms,
        }
    }
}

/// The jitter buffer plus its elastic scheduler.
#[derive(Debug)]
pub struct PlaybackScheduler {
    params: SchedulerParams,
    queue: VecDeque<JitterItem>,
    /// End of the last scheduled segment; the next back-to-back start.
    strict_next: Option<Instant>,
    /// Smoothed live playback rate.
    rate: f64,
}

impl PlaybackScheduler {
    pub fn new(params: SchedulerParams) -> Self {
        Self {
            params,
            queue: VecDeque::new(),
            strict_next: None,
            rate: 1.0,
        }
    }

    pub fn set_params(&mut self, params: SchedulerParams) {
        self.params = params;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queue a decoded segment, scheduling it back-to-back after the last.
    pub fn push_segment(&mut self, group_id: u64, samples: Vec<f32>, now: Instant) {
        if samples.is_empty() {
            return;
        }
        let duration_ms =
            (samples.len() as u64 * 1_000) / self.params.sample_rate.max(1) as u64;
        let earliest = now + Duration::from_millis(self.params.lookahead_ms);
        let scheduled_at = match self.strict_next {
            Some(next) if next > earliest => next,
            _ => earliest,
        };
        self.strict_next = Some(scheduled_at + Duration::from_millis(duration_ms));
        self.queue.push_back(JitterItem {
            group_id,
            samples,
            duration_ms,
            scheduled_at,
        });
    }

    /// Queued playback duration in ms: time from `now` to the scheduled end
    /// of the last segment.
    pub fn queued_ms(&self, now: Instant) -> u64 {
        self.strict_next
            .filter(|_| !self.queue.is_empty())
            .map(|t| t.saturating_duration_since(now).as_millis() as u64)
            .unwrap_or(0)
    }

    /// Target rate for the given queued duration: 1.0x below the low-water
    /// mark, linear ramp to the cap at the high-water mark, flat above.
    pub fn target_rate(&self, queued_ms: u64) -> f64 {
        let p = &self.params;
        if queued_ms <= p.low_water_ms {
            1.0
        } else if queued_ms >= p.high_water_ms {
            p.max_rate
        } else {
            let frac = (queued_ms - p.low_water_ms) as f64
                / (p.high_water_ms - p.low_water_ms) as f64;
            1.0 + (p.max_rate - 1.0) * frac
        }
    }

    /// Scheduling tick: smooth the live rate toward the target.
    pub fn tick(&mut self, now: Instant) {
        let target = self.target_rate(self.queued_ms(now));
        self.rate += self.params.smoothing * (target - self.rate);
        self.rate = self.rate.clamp(1.0, self.params.max_rate);
    }

    /// Pop the next segment if its scheduled time has arrived.
    ///
    /// Returns the segment and the smoothed rate in effect. The schedule is
    /// untouched here; the renderer reports the duration the segment
    /// actually plays for through [`commit_playback`](Self::commit_playback)
    /// once the full stretch composition is known.
    pub fn pop_due(&mut self, now: Instant) -> Option<(JitterItem, f64)> {
        let due = self
            .queue
            .front()
            .map(|item| item.scheduled_at <= now)
            .unwrap_or(false);
        if !due {
            return None;
        }
        let item = self.queue.pop_front().expect("front checked above");
        Some((item, self.rate))
    }

    /// Report the realized playback duration of a popped segment.
    ///
    /// The schedule of all remaining segments moves earlier by the time the
    /// stretch actually saved (`raw - effective`), which is how faster
    /// playback drains backlog without opening gaps between segments.
    pub fn commit_playback(&mut self, raw_ms: u64, effective_ms: u64) {
        let saved = Duration::from_millis(raw_ms.saturating_sub(effective_ms));
        if saved.is_zero() {
            return;
        }
        for queued in &mut self.queue {
            queued.scheduled_at -= saved;
        }
        if let Some(next) = self.strict_next.as_mut() {
            *next -= saved;
        }
    }

    /// Drop everything (disconnect / reset).
    pub fn clear(&mut self) {
        self.queue.clear();
        self.strict_next = None;
        self.rate = 1.0;
    }
}
