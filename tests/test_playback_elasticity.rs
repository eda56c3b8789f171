// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Integration tests for elastic playback: the scheduler's rate loop, the
//! macro stretch tiers, and their bounded composition on the render path.

use std::time::{Duration, Instant};

use simulex::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const RATE: u32 = 16_000;

fn tone_ms(ms: u64) -> Vec<f32> {
    let n = (RATE as u64 / 1_000 * ms) as usize;
    (0..n)
        .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / RATE as f32).sin() * 0.5)
        .collect()
}

fn opened(engine: &mut Engine, now: Instant) {
    engine.begin_connection(1);
    engine.on_session_event(
        now,
        SessionEvent {
            ticket: 1,
            kind: SessionEventKind::Opened,
        },
    );
}

fn inbound_audio(engine: &mut Engine, now: Instant, bytes: usize) {
    engine.on_session_event(
        now,
        SessionEvent {
            ticket: 1,
            kind: SessionEventKind::Audio(vec![1u8; bytes]),
        },
    );
}

// ---------------------------------------------------------------------------
// Scheduler rate loop
// ---------------------------------------------------------------------------

#[test]
fn test_applied_rate_stays_within_cap_under_deep_backlog() {
    let mut s = PlaybackScheduler::new(SchedulerParams::default());
    let now = Instant::now();
    for _ in 0..40 {
        s.push_segment(1, tone_ms(100), now);
    }
    assert!(s.queued_ms(now) >= 2_000);

    // Let the smoothed rate converge on the deep-backlog target.
    for _ in 0..500 {
        s.tick(now);
    }
    let (_, applied) = s.pop_due(now + Duration::from_millis(50)).expect("segment due");
    assert!(applied > 1.0);
    assert!(applied <= 1.12 + 1e-9, "applied rate {applied} exceeds the cap");
}

// ---------------------------------------------------------------------------
// Macro tiers through the engine
// ---------------------------------------------------------------------------

#[test]
fn test_macro_tier_follows_engine_backlog() {
    let mut engine = Engine::new(EngineConfig::default());
    let now = Instant::now();
    opened(&mut engine, now);

    // 12 s of inbound audio: the 10-15 s band selects the 1.10x tier.
    for _ in 0..12 {
        inbound_audio(&mut engine, now, 32_000);
    }

    let mut out = vec![0.0f32; 320];
    let status = engine.render(now + Duration::from_millis(100), &mut out);
    assert_eq!(status, RenderStatus::Active);
    assert!(out.iter().any(|v| v.abs() > 0.003), "tier must not mute output");

    let d = engine.diagnostics(now + Duration::from_millis(100));
    assert!((d.macro_factor - 1.10).abs() < f64::EPSILON);
}

#[test]
fn test_composed_speedup_is_bounded() {
    let mut scheduler = PlaybackScheduler::new(SchedulerParams::default());
    let mut renderer = ElasticRenderer::new(RendererParams::default());
    let now = Instant::now();

    let input = tone_ms(2_000);
    let input_len = input.len();
    scheduler.push_segment(1, input, now);

    // A severe combined backlog selects the strongest tier (1.30x). Even
    // with the micro nudge on top, total compression stays well under 1.5x.
    let later = now + Duration::from_secs(3);
    let mut out = vec![0.0f32; input_len];
    renderer.render(later, &mut scheduler, 30_000, &mut out);
    assert!((renderer.macro_factor() - 1.30).abs() < f64::EPSILON);

    let produced = out.iter().filter(|v| v.abs() > 1e-6).count();
    assert!(
        produced > input_len * 10 / 16,
        "over-compressed: {produced} of {input_len} samples"
    );
    assert!(
        produced < input_len * 10 / 11,
        "under-compressed: {produced} of {input_len} samples"
    );
}

// ---------------------------------------------------------------------------
// Render path behavior
// ---------------------------------------------------------------------------

#[test]
fn test_render_drains_queued_backlog() {
    let mut engine = Engine::new(EngineConfig::default());
    let now = Instant::now();
    opened(&mut engine, now);

    // One 2 s inbound phrase.
    inbound_audio(&mut engine, now, 64_000);
    assert!(engine.diagnostics(now).jitter_ms >= 2_000);

    // No backlog pressure: playback is a pure passthrough.
    let later = now + Duration::from_secs(3);
    let mut out = vec![0.0f32; 40_000];
    let status = engine.render(later, &mut out);
    assert_eq!(status, RenderStatus::Active);

    let produced = out.iter().filter(|v| v.abs() > 0.003).count();
    assert!(produced >= 30_000, "got {produced} voiced samples");
    assert_eq!(engine.diagnostics(later).jitter_ms, 0);
}

#[test]
fn test_sustained_silence_requests_suspend() {
    let mut engine = Engine::new(EngineConfig::default());
    let start = Instant::now();
    opened(&mut engine, start);

    let mut out = vec![0.0f32; 160];
    assert_eq!(engine.render(start, &mut out), RenderStatus::Active);
    assert_eq!(
        engine.render(start + Duration::from_millis(3_100), &mut out),
        RenderStatus::Suspend
    );

    // The next queued phrase resumes playback.
    let resume_at = start + Duration::from_millis(4_000);
    inbound_audio(&mut engine, resume_at, 3_200);
    let playing = resume_at + Duration::from_millis(50);
    assert_eq!(engine.render(playing, &mut out), RenderStatus::Active);
}
