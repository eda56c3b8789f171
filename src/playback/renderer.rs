// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Elastic output renderer.
//!
//! The real-time render callback. Pulls due segments from the playback
//! scheduler, applies the pitch-preserving stretch (the larger of the
//! scheduler's smoothed rate and the discrete macro tier, both realized
//! through the overlap-correlate stretcher) plus the micro smoothing nudge,
//! and fills the output quantum. Must stay non-blocking and bounded-time
//! per call.
//!
//! The renderer also detects sustained silence (no voiced output for
//! several seconds) and asks the host to suspend the audio hardware to save
//! power; the next queued sample resumes it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::playback::stretch::{
    macro_factor_for_backlog_ms, MacroStretcher, MicroSmoother, StretchParams, MACRO_FACTOR_MAX,
};
use crate::playback::PlaybackScheduler;

/// Amplitude above which an output sample counts as voiced.
const VOICED_AMPLITUDE: f32 = 0.003;

/// Outcome of one render quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// Keep the hardware running.
    Active,
    /// Sustained silence: the host may suspend the output device.
    Suspend,
}

/// Renderer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererParams {
    pub sample_rate: u32,
    /// Upper bound on the micro-smoothing rate nudge (fraction).
    pub micro_rate_max: f64,
    /// Sustained silence after which suspend is requested.
    pub suspend_after_ms: u64,
}

impl Default for RendererParams {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RendererParams {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            sample_rate: cfg.sample_rate,
            micro_rate_max: cfg.micro_rate_max,
            suspend_after_ms: cfg.suspend_after_ms,
        }
    }
}

/// The elastic output renderer.
pub struct ElasticRenderer {
    params: RendererParams,
    stretcher: MacroStretcher,
    micro: MicroSmoother,
    /// Samples stretched and ready to emit.
    pending: VecDeque<f32>,
    /// Onset of the current silent stretch in the rendered output.
    silent_since: Option<Instant>,
    /// Last applied macro factor, exposed for diagnostics.
    macro_factor: f64,
}

impl ElasticRenderer {
    pub fn new(params: RendererParams) -> Self {
        let stretch = StretchParams {
            sample_rate: params.sample_rate,
            ..StretchParams::default()
        };
        Self {
            params,
            stretcher: MacroStretcher::new(stretch),
            micro: MicroSmoother::new(),
            pending: VecDeque::new(),
            silent_since: None,
            macro_factor: 1.0,
        }
    }

    /// Last applied macro stretch factor.
    pub fn macro_factor(&self) -> f64 {
        self.macro_factor
    }

    /// The micro rate applied for a given macro factor: scales with macro
    /// engagement (there are no seams to mask at 1.0x) and is hard-bounded
    /// by the configured cap.
    pub fn micro_rate_for(&self, macro_factor: f64) -> f64 {
        let engagement = ((macro_factor - 1.0) / (MACRO_FACTOR_MAX - 1.0)).clamp(0.0, 1.0);
        1.0 + self.params.micro_rate_max * engagement
    }

    /// Render one output quantum.
    ///
    /// `combined_backlog_ms` is the Dam estimate plus the jitter-buffer
    /// duration; it selects the macro stretch tier. Unfilled output samples
    /// are zeroed.
    pub fn render(
        &mut self,
        now: Instant,
        scheduler: &mut PlaybackScheduler,
        combined_backlog_ms: u64,
        out: &mut [f32],
    ) -> RenderStatus {
        let tier = macro_factor_for_backlog_ms(combined_backlog_ms);
        let rate = self.params.sample_rate.max(1) as u64;

        // Pull everything that should start within this quantum, so stretched
        // segments land back-to-back with no zero-filled seams between them.
        let quantum_ms = out.len() as u64 * 1_000 / rate;
        let horizon = now + Duration::from_millis(quantum_ms);
        while self.pending.len() < out.len() {
            let (item, applied_rate) = match scheduler.pop_due(horizon) {
                Some(popped) => popped,
                None => break,
            };
            // Both the scheduler's smoothed rate and the macro tier are
            // realized pitch-preservingly; take the stronger of the two.
            let factor = tier.max(applied_rate);
            self.macro_factor = factor;
            let micro_rate = self.micro_rate_for(factor);
            let stretched = self.stretcher.process(&item.samples, factor);
            let before = self.pending.len();
            for s in self.micro.process(&stretched, micro_rate) {
                self.pending.push_back(s);
            }
            // The schedule compresses by what the stretch actually saved,
            // not by the smoothed rate alone.
            let emitted = (self.pending.len() - before) as u64;
            scheduler.commit_playback(item.duration_ms, emitted * 1_000 / rate);
        }

        let mut voiced = false;
        for slot in out.iter_mut() {
            let sample = self.pending.pop_front().unwrap_or(0.0);
            if sample.abs() > VOICED_AMPLITUDE {
                voiced = true;
            }
            *slot = sample;
        }

        if voiced {
            self.silent_since = None;
            return RenderStatus::Active;
        }
        let since = *self.silent_since.get_or_insert(now);
        let silent_ms = now.saturating_duration_since(since).as_millis() as u64;
        if silent_ms >= self.params.suspend_after_ms {
            RenderStatus::Suspend
        } else {
            RenderStatus::Active
        }
    }

    /// Drop buffered output (disconnect / reset).
    pub fn reset(&mut self) {
        self.pending.clear();
        self.micro.reset();
        self.silent_since = None;
        self.macro_factor = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::SchedulerParams;
    use std::time::Duration;

    const RATE: u32 = 16_000;

    fn renderer() -> ElasticRenderer {
        ElasticRenderer::new(RendererParams::default())
    }

    fn scheduler() -> PlaybackScheduler {
        PlaybackScheduler::new(SchedulerParams::default())
    }

    fn tone_ms(ms: u64) -> Vec<f32> {
        let n = (RATE as u64 / 1_000 * ms) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / RATE as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_renders_queued_audio() {
        let mut r = renderer();
        let mut s = scheduler();
        let now = Instant::now();
        s.push_segment(1, tone_ms(100), now);

        let later = now + Duration::from_millis(50);
        let mut out = vec![0.0f32; 320];
        let status = r.render(later, &mut s, 0, &mut out);
        assert_eq!(status, RenderStatus::Active);
        assert!(out.iter().any(|v| v.abs() > 0.01));
    }

    #[test]
    fn test_silence_requests_suspend_after_timeout() {
        let mut r = renderer();
        let mut s = scheduler();
        let start = Instant::now();
        let mut out = vec![0.0f32; 160];

        assert_eq!(r.render(start, &mut s, 0, &mut out), RenderStatus::Active);
        let later = start + Duration::from_millis(3_100);
        assert_eq!(r.render(later, &mut s, 0, &mut out), RenderStatus::Suspend);
    }

    #[test]
    fn test_queued_sample_resumes_from_suspend() {
        let mut r = renderer();
        let mut s = scheduler();
        let start = Instant::now();
        let mut out = vec![0.0f32; 160];
        let later = start + Duration::from_millis(4_000);
        r.render(start, &mut s, 0, &mut out);
        assert_eq!(r.render(later, &mut s, 0, &mut out), RenderStatus::Suspend);

        s.push_segment(1, tone_ms(100), later);
        let playing = later + Duration::from_millis(50);
        assert_eq!(r.render(playing, &mut s, 0, &mut out), RenderStatus::Active);
    }

    #[test]
    fn test_micro_rate_bounded() {
        let r = renderer();
        for factor in [1.0, 1.05, 1.10, 1.20, 1.30, 2.0] {
            let micro = r.micro_rate_for(factor);
            assert!(micro >= 1.0);
            assert!(micro <= 1.02 + 1e-9, "micro rate {micro} exceeds the 2% cap");
        }
        assert!((r.micro_rate_for(1.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_high_backlog_drains_faster_than_realtime() {
        let mut r = renderer();
        let mut s = scheduler();
        let now = Instant::now();
        s.push_segment(1, tone_ms(500), now);

        // Deep combined backlog selects the 1.30x tier: 500 ms of input
        // yields clearly fewer than 500 ms of output samples.
        let later = now + Duration::from_millis(50);
        let mut out = vec![0.0f32; (RATE / 2) as usize];
        r.render(later, &mut s, 30_000, &mut out);
        assert!((r.macro_factor() - 1.30).abs() < f64::EPSILON);
        let produced = out.iter().filter(|v| v.abs() > 0.0).count();
        assert!(
            produced < (RATE as usize / 2) * 85 / 100,
            "expected compression, got {produced} voiced samples"
        );
    }

    #[test]
    fn test_tier_stretched_stream_plays_without_gaps() {
        let mut r = renderer();
        let mut s = scheduler();
        let start = Instant::now();
        // A 2 s phrase in 100 ms segments, rate warmed to its cap, rendered
        // in real-time 10 ms quanta under a deep combined backlog (1.30x).
        for _ in 0..20 {
            s.push_segment(1, tone_ms(100), start);
        }
        for _ in 0..500 {
            s.tick(start);
        }

        let mut rendered = Vec::new();
        let mut now = start;
        for _ in 0..250 {
            let mut out = vec![0.0f32; 160];
            r.render(now, &mut s, 30_000, &mut out);
            rendered.extend(out);
            now += Duration::from_millis(10);
        }

        let first = rendered
            .iter()
            .position(|v| v.abs() > VOICED_AMPLITUDE)
            .expect("stream rendered");
        let last = rendered.iter().rposition(|v| v.abs() > VOICED_AMPLITUDE).unwrap();

        // No inserted silence between segments: unfilled slots are exact
        // zeros, voiced samples essentially never are.
        let mut run = 0usize;
        let mut worst = 0usize;
        for &v in &rendered[first..=last] {
            if v == 0.0 {
                run += 1;
                worst = worst.max(run);
            } else {
                run = 0;
            }
        }
        assert!(worst <= 8, "{worst} zero samples inserted mid-stream");

        // The backlog drains at the tier rate, not the scheduler cap: 2 s of
        // input plays in well under 2000 / 1.12 ms of wall time.
        let span = last - first + 1;
        assert!(span < 27_500, "drained too slowly: {span} samples");
        assert!(span > 23_000, "over-compressed: {span} samples");
    }

    #[test]
    fn test_reset_clears_pending() {
        let mut r = renderer();
        let mut s = scheduler();
        let now = Instant::now();
        s.push_segment(1, tone_ms(100), now);
        let mut out = vec![0.0f32; 16];
        r.render(now + Duration::from_millis(50), &mut s, 0, &mut out);
        r.reset();
        assert!((r.macro_factor() - 1.0).abs() < f64::EPSILON);
        let mut out2 = vec![1.0f32; 16];
        r.render(now + Duration::from_millis(60), &mut s, 0, &mut out2);
        // Nothing pending: output must be zero-filled.
        assert!(out2.iter().all(|v| *v == 0.0));
    }
}
