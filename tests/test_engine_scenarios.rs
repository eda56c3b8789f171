// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! End-to-end engine scenarios: silence escalation, persona tiers, latency
//! model behavior, and diagnostics.

use std::time::{Duration, Instant};

use simulex::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const RATE: u32 = 16_000;

fn speech() -> SpeechScore {
    SpeechScore {
        probability: 0.9,
        energy: 0.2,
    }
}

fn silence() -> SpeechScore {
    SpeechScore {
        probability: 0.0,
        energy: 0.0,
    }
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

fn feed(
    engine: &mut Engine,
    start: Instant,
    ms: u64,
    score: SpeechScore,
) -> (Instant, Vec<EngineAction>) {
    let frame = vec![0u8; (RATE as usize / 1_000) * 10 * 2];
    let mut now = start;
    let mut actions = Vec::new();
    for _ in 0..ms / 10 {
        now += Duration::from_millis(10);
        actions.extend(engine.on_scored_frame(now, score, &frame));
    }
    (now, actions)
}

// ---------------------------------------------------------------------------
// Silence escalation
// ---------------------------------------------------------------------------

#[test]
fn test_escalation_sequence_and_timing() {
    // Stock thresholds: the turn finalizes quickly, but the stages still
    // fire into the same silence. The long ghost timeout only keeps the
    // dispatched turn visible for the final assertion.
    let cfg = EngineConfig {
        ghost_timeout_ms: 60_000,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(cfg);
    let start = Instant::now();
    opened(&mut engine, start);

    // 2 s of speech, then the speaker goes quiet for 6 s.
    let (quiet_at, _) = feed(&mut engine, start, 2_000, speech());

    let frame = vec![0u8; (RATE as usize / 1_000) * 10 * 2];
    let mut now = quiet_at;
    let mut timeline: Vec<(u64, EngineAction)> = Vec::new();
    for _ in 0..600 {
        now += Duration::from_millis(10);
        let silence_ms = now.saturating_duration_since(quiet_at).as_millis() as u64;
        for action in engine.on_scored_frame(now, silence(), &frame) {
            timeline.push((silence_ms, action));
        }
        for action in engine.tick(now) {
            timeline.push((silence_ms, action));
        }
    }

    // The silence threshold (275 ms base, floored) dispatches the turn
    // almost immediately; the escalation keeps running regardless.
    let dispatched = timeline
        .iter()
        .find(|(_, a)| *a == EngineAction::SendEndOfTurn)
        .expect("threshold must dispatch the turn");
    assert!(dispatched.0 < 400, "dispatched at {} ms", dispatched.0);

    let signals: Vec<&(u64, EngineAction)> = timeline
        .iter()
        .filter(|(_, a)| matches!(a, EngineAction::SendTextSignal(_)))
        .collect();
    assert_eq!(signals.len(), 2);

    // Repeat request just past 1.5 s of silence.
    let (repeat_ms, repeat) = signals[0];
    assert!((1_500..1_700).contains(repeat_ms), "repeat at {repeat_ms} ms");
    assert!(
        matches!(repeat, EngineAction::SendTextSignal(t) if t.contains("repeat")),
        "{repeat:?}"
    );

    // Filler just past 3 s, in the configured language (English default).
    let (filler_ms, filler) = signals[1];
    assert!((3_000..3_200).contains(filler_ms), "filler at {filler_ms} ms");
    assert!(
        matches!(filler, EngineAction::SendTextSignal(t) if t == "One moment."),
        "{filler:?}"
    );

    // The 5 s cut has nothing left to finalize; the stage is terminal and
    // the one dispatched turn is still the only end-of-turn sent.
    let ends = timeline
        .iter()
        .filter(|(_, a)| *a == EngineAction::SendEndOfTurn)
        .count();
    assert_eq!(ends, 1);
    assert_eq!(
        engine.diagnostics(now).escalation_stage,
        EscalationStage::Cut
    );
    assert_eq!(engine.diagnostics(now).in_flight_turns, 1);
}

#[test]
fn test_escalation_cut_finalizes_a_held_turn() {
    // Generous segmentation thresholds keep the turn open mid-gap, so the
    // 5 s cut is what dispatches it.
    let cfg = EngineConfig {
        silence_floor_ms: 10_000,
        ghost_tolerance_ms: 10_000,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(cfg);
    let start = Instant::now();
    opened(&mut engine, start);

    let (quiet_at, _) = feed(&mut engine, start, 2_000, speech());
    let frame = vec![0u8; (RATE as usize / 1_000) * 10 * 2];
    let mut now = quiet_at;
    let mut cut_at = None;
    for _ in 0..600 {
        now += Duration::from_millis(10);
        assert!(
            engine
                .on_scored_frame(now, silence(), &frame)
                .is_empty(),
            "threshold must not finalize before the cut"
        );
        if engine.tick(now).contains(&EngineAction::SendEndOfTurn) {
            cut_at = Some(now.saturating_duration_since(quiet_at).as_millis() as u64);
        }
    }

    let cut_at = cut_at.expect("cut must dispatch the turn");
    assert!((5_000..5_200).contains(&cut_at), "cut at {cut_at} ms");
    assert_eq!(engine.diagnostics(now).in_flight_turns, 1);
}

#[test]
fn test_escalation_resets_on_resumed_speech() {
    let cfg = EngineConfig {
        silence_floor_ms: 10_000,
        ghost_tolerance_ms: 10_000,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(cfg);
    let start = Instant::now();
    opened(&mut engine, start);

    let (now, _) = feed(&mut engine, start, 1_000, speech());
    // 2 s of silence reaches the repeat stage only.
    let frame = vec![0u8; (RATE as usize / 1_000) * 10 * 2];
    let mut now = now;
    let mut signals = 0;
    for _ in 0..200 {
        now += Duration::from_millis(10);
        engine.on_scored_frame(now, silence(), &frame);
        signals += engine
            .tick(now)
            .iter()
            .filter(|a| matches!(a, EngineAction::SendTextSignal(_)))
            .count();
    }
    assert_eq!(signals, 1, "only the repeat request fires in 2 s");

    // Speech resumes, then another 2 s gap: the protocol restarts from
    // scratch instead of continuing to the filler.
    let (now, _) = feed(&mut engine, now, 500, speech());
    // A tick while voiced drops the machine back to idle.
    engine.tick(now);
    let mut now = now;
    let mut signals = Vec::new();
    for _ in 0..200 {
        now += Duration::from_millis(10);
        engine.on_scored_frame(now, silence(), &frame);
        for a in engine.tick(now) {
            if let EngineAction::SendTextSignal(t) = a {
                signals.push(t);
            }
        }
    }
    assert_eq!(signals.len(), 1);
    assert!(signals[0].contains("repeat"));
}

// ---------------------------------------------------------------------------
// Persona tiers
// ---------------------------------------------------------------------------

#[test]
fn test_persona_tiers_follow_combined_backlog() {
    let mut engine = Engine::new(EngineConfig::default());
    let now = Instant::now();
    opened(&mut engine, now);

    let push_seconds = |engine: &mut Engine, secs: usize| {
        for _ in 0..secs {
            engine.on_session_event(
                now,
                SessionEvent {
                    ticket: 1,
                    // 1 s of PCM16 at 16 kHz.
                    kind: SessionEventKind::Audio(vec![1u8; 32_000]),
                },
            );
        }
    };

    // 16 s of backlog crosses the FAST boundary.
    push_seconds(&mut engine, 16);
    let actions = engine.tick(now);
    let fast: Vec<_> = actions
        .iter()
        .filter_map(|a| match a {
            EngineAction::SendTextSignal(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(fast.len(), 1);
    assert_eq!(engine.diagnostics(now).persona_tier, PersonaTier::Fast);

    // 10 more seconds crosses ROCKET.
    push_seconds(&mut engine, 10);
    let actions = engine.tick(now);
    assert!(actions
        .iter()
        .any(|a| matches!(a, EngineAction::SendTextSignal(_))));
    assert_eq!(engine.diagnostics(now).persona_tier, PersonaTier::Rocket);

    // Fully drained: one NORMAL instruction on the way back down.
    let later = now + Duration::from_secs(40);
    let actions = engine.tick(later);
    let back: Vec<_> = actions
        .iter()
        .filter(|a| matches!(a, EngineAction::SendTextSignal(_)))
        .collect();
    assert_eq!(back.len(), 1);
    assert_eq!(engine.diagnostics(later).persona_tier, PersonaTier::Normal);
}

// ---------------------------------------------------------------------------
// Latency model
// ---------------------------------------------------------------------------

#[test]
fn test_latency_model_identical_history_scenario() {
    let mut model = LatencyModel::new(LatencyParams::default());
    for _ in 0..20 {
        model.record_sample(1_000.0, 2_000.0);
    }
    let est = model.current_model();
    assert!((est.slope - 2.0).abs() < 1e-9);
    assert!((est.intercept_ms - 200.0).abs() < 1e-9);
    assert!(est.margin_ms < 1e-9);
    assert!((est.confidence - 1.0).abs() < f64::EPSILON);
    assert!((model.predict_ms(1_000.0) - 2_200.0).abs() < 1e-6);
}

#[test]
fn test_cold_start_sizes_the_shield_conservatively() {
    let mut engine = Engine::new(EngineConfig::default());
    let start = Instant::now();
    opened(&mut engine, start);

    let (now, _) = feed(&mut engine, start, 1_000, speech());
    let (now, actions) = feed(&mut engine, now, 400, silence());
    assert_eq!(actions.len(), 2);

    // With no history the prediction is the fixed conservative model:
    // ~1.1 s input * 1.2 + 1500 + 3000 ms.
    let d = engine.diagnostics(now);
    assert!(d.shield_active);
    assert!(
        (5_000..6_000).contains(&d.shield_remaining_ms),
        "remaining {} ms",
        d.shield_remaining_ms
    );
    assert!((d.latency.confidence - 0.0).abs() < f64::EPSILON);
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[test]
fn test_diagnostics_snapshot_reflects_state_and_serializes() {
    let mut engine = Engine::new(EngineConfig::default());
    let start = Instant::now();
    opened(&mut engine, start);

    let (now, _) = feed(&mut engine, start, 500, speech());
    engine.on_session_event(
        now,
        SessionEvent {
            ticket: 1,
            kind: SessionEventKind::Audio(vec![1u8; 32_000]),
        },
    );

    let d = engine.diagnostics(now);
    assert!(d.speaking);
    assert!(d.speaking_ms >= 500);
    assert!(d.jitter_ms >= 1_000);
    assert_eq!(d.session_state, SessionState::Connected);

    let json = serde_json::to_string(&d).expect("snapshot serializes");
    assert!(json.contains("\"speaking\":true"));
    assert!(json.contains("\"session_state\":\"Connected\""));
}
