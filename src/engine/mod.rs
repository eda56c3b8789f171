// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Engine orchestration.
//!
//! [`Engine`] is the pure core: it wires the segmenter, flow controller,
//! latency model, turn queue, playback scheduler, and escalation machine
//! together, consuming capture frames, session events, and ticks, and
//! emitting [`EngineAction`]s for the host to perform. It holds no sockets,
//! spawns no tasks, and takes the current [`Instant`] explicitly, so every
//! cross-module behavior is testable without a runtime.
//!
//! [`EngineRuntime`] is the thin async shell around it: a single tokio task
//! multiplexing capture frames, ticketed session events, the periodic tick,
//! and live configuration swaps, plus connect/reconnect handling with
//! exponential backoff and the pre-connect transmit ring.

pub mod diagnostics;

use std::time::Instant;

use crate::audio::probability::{
    EnergyProbabilitySource, SpeechProbabilitySource, SpeechScore,
};
use crate::audio::utils::pcm16_to_f32;
use crate::config::EngineConfig;
use crate::engine::diagnostics::DiagnosticsSnapshot;
use crate::flow::persona::{PersonaParams, PersonaTracker};
use crate::flow::{DamFlush, FlowController, FlowParams};
use crate::latency::{LatencyModel, LatencyParams};
use crate::playback::renderer::{ElasticRenderer, RenderStatus, RendererParams};
use crate::playback::{PlaybackScheduler, SchedulerParams};
use crate::segmentation::escalation::{
    EscalationAction, EscalationParams, SilenceEscalation,
};
use crate::segmentation::{BacklogPressure, SegmentEvent, SegmentState, Segmenter, SegmenterParams};
use crate::session::{classify_error, ErrorClass, SessionEvent, SessionEventKind, SessionState};
use crate::turns::{Turn, TurnQueue};

/// Signal asking the remote to repeat its previous utterance.
const REPEAT_REQUEST_TEXT: &str = "Please repeat your last sentence.";

/// Side effects requested by the engine core.
///
/// The host (normally [`EngineRuntime`]) performs these in order; the core
/// never touches the transport itself.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Transmit a PCM16 chunk to the remote.
    SendAudio(Vec<u8>),
    /// Mark the end of the current input turn.
    SendEndOfTurn,
    /// Push a one-shot text signal (persona instruction, repeat request,
    /// filler phrase).
    SendTextSignal(String),
    /// A transcription fragment for the host UI.
    Transcription(String),
    /// A user-visible notice (errors, overflow warnings).
    Notice(String),
}

/// The pure orchestration core.
pub struct Engine {
    config: EngineConfig,
    probability: Box<dyn SpeechProbabilitySource>,
    segmenter: Segmenter,
    escalation: SilenceEscalation,
    flow: FlowController,
    persona: PersonaTracker,
    latency: LatencyModel,
    turns: TurnQueue,
    scheduler: PlaybackScheduler,
    renderer: ElasticRenderer,

    session_state: SessionState,
    /// The connection generation whose events are currently accepted.
    live_ticket: u64,
    /// Logical phrase id for inbound audio grouping; bumps on turn-complete.
    group_id: u64,
    last_response_ms: Option<f64>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let ghost_timeout = std::time::Duration::from_millis(config.ghost_timeout_ms);
        Self {
            probability: Box::new(EnergyProbabilitySource::default()),
            segmenter: Segmenter::new(SegmenterParams::from_config(&config), config.sample_rate),
            escalation: SilenceEscalation::new(EscalationParams::from_config(&config)),
            flow: FlowController::new(FlowParams::from_config(&config)),
            persona: PersonaTracker::new(PersonaParams::from_config(&config)),
            latency: LatencyModel::new(LatencyParams::from_config(&config)),
            turns: TurnQueue::new(ghost_timeout),
            scheduler: PlaybackScheduler::new(SchedulerParams::from_config(&config)),
            renderer: ElasticRenderer::new(RendererParams::from_config(&config)),
            session_state: SessionState::Disconnected,
            live_ticket: 0,
            group_id: 0,
            last_response_ms: None,
            config,
        }
    }

    /// Builder method: replace the speech classifier.
    pub fn with_probability_source(mut self, source: Box<dyn SpeechProbabilitySource>) -> Self {
        self.probability = source;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    pub fn set_session_state(&mut self, state: SessionState) {
        if state != self.session_state {
            tracing::info!(from = %self.session_state, to = %state, "session state change");
            self.session_state = state;
        }
    }

    /// A new connection attempt started under `ticket`; events carrying any
    /// other ticket are dropped from now on.
    pub fn begin_connection(&mut self, ticket: u64) {
        self.live_ticket = ticket;
        self.set_session_state(SessionState::Connecting);
    }

    /// Drop all per-connection state after the transport is gone. In-flight
    /// turns are left for the ghost collector; capture state survives so an
    /// utterance in progress is not lost across a reconnect.
    pub fn on_connection_lost(&mut self) {
        self.flow.reset();
        self.scheduler.clear();
        self.renderer.reset();
    }

    /// Swap the live configuration.
    ///
    /// Takes effect on the control path (thresholds, tiers, rates) without
    /// disturbing in-progress state. History capacities and the sample rate
    /// are fixed at construction.
    pub fn update_config(&mut self, config: EngineConfig) {
        self.segmenter.set_params(SegmenterParams::from_config(&config));
        self.escalation.set_params(EscalationParams::from_config(&config));
        self.flow.set_params(FlowParams::from_config(&config));
        self.persona.set_params(PersonaParams::from_config(&config));
        self.scheduler.set_params(SchedulerParams::from_config(&config));
        self.config = config;
        tracing::debug!("engine configuration swapped");
    }

    // -------------------------------------------------------------------------
    // Input paths
    // -------------------------------------------------------------------------

    /// Feed one captured PCM16 frame through the built-in classifier.
    pub fn on_capture_frame(&mut self, now: Instant, frame: &[u8]) -> Vec<EngineAction> {
        let score = self.probability.process(frame);
        self.on_scored_frame(now, score, frame)
    }

    /// Feed one pre-scored frame. Hosts with their own classifier use this
    /// entry point directly.
    pub fn on_scored_frame(
        &mut self,
        now: Instant,
        score: SpeechScore,
        frame: &[u8],
    ) -> Vec<EngineAction> {
        let pressure = self.pressure(now);
        match self.segmenter.process_frame(now, score, frame, pressure) {
            SegmentEvent::None => Vec::new(),
            SegmentEvent::SpeechStarted => {
                self.escalation.reset();
                Vec::new()
            }
            SegmentEvent::TurnFinalized(turn) => self.dispatch_turn(now, turn),
        }
    }

    /// Handle one ticketed session event.
    pub fn on_session_event(&mut self, now: Instant, event: SessionEvent) -> Vec<EngineAction> {
        if event.ticket != self.live_ticket {
            tracing::trace!(
                event_ticket = event.ticket,
                live_ticket = self.live_ticket,
                "dropping stale session event"
            );
            return Vec::new();
        }

        match event.kind {
            SessionEventKind::Opened => {
                self.set_session_state(SessionState::Connected);
                Vec::new()
            }
            SessionEventKind::Audio(pcm) => {
                self.flow.on_inbound_audio(now);
                self.segmenter.close_gap();
                let samples = pcm16_to_f32(&pcm);
                self.scheduler.push_segment(self.group_id, samples, now);
                Vec::new()
            }
            SessionEventKind::Text(text) => vec![EngineAction::Transcription(text)],
            SessionEventKind::TurnComplete => self.on_remote_turn_complete(now),
            SessionEventKind::Error(msg) => match classify_error(&msg) {
                // Unrecoverable failures surface to the user; transient ones
                // stay behind the recovering indicator.
                ErrorClass::Fatal => {
                    vec![EngineAction::Notice(format!("session error: {msg}"))]
                }
                ErrorClass::Transient => {
                    tracing::warn!(error = %msg, "transient session error");
                    self.set_session_state(SessionState::Recovering);
                    Vec::new()
                }
            },
            SessionEventKind::Closed => Vec::new(),
        }
    }

    /// Periodic tick: ghost collection, silence escalation, deferred Dam
    /// releases, persona tracking, and the playback rate loop.
    pub fn tick(&mut self, now: Instant) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        self.turns.collect_ghosts(now);

        match self.escalation.poll(now, self.segmenter.escalation_anchor()) {
            Some(EscalationAction::RepeatRequest) => {
                actions.push(EngineAction::SendTextSignal(REPEAT_REQUEST_TEXT.to_string()));
            }
            Some(EscalationAction::Filler(phrase)) => {
                actions.push(EngineAction::SendTextSignal(phrase.to_string()));
            }
            Some(EscalationAction::Cut) => {
                if let Some(turn) = self.segmenter.force_finalize(now) {
                    actions.extend(self.dispatch_turn(now, turn));
                }
            }
            None => {}
        }

        let backlog_low = self.backlog_low(now);
        if let Some(flush) = self.flow.poll_release(now, backlog_low) {
            actions.extend(self.flush_actions(now, flush));
        }

        let combined = self.combined_backlog_ms(now);
        if let Some(tier) = self.persona.update(combined) {
            actions.push(EngineAction::SendTextSignal(tier.instruction().to_string()));
        }

        self.scheduler.tick(now);
        actions
    }

    /// Render one output quantum. Called from the host's audio callback;
    /// bounded-time, never blocks on the transport.
    pub fn render(&mut self, now: Instant, out: &mut [f32]) -> RenderStatus {
        let combined = self.flow.dam_duration_ms() + self.scheduler.queued_ms(now);
        self.renderer.render(now, &mut self.scheduler, combined, out)
    }

    /// Point-in-time diagnostics.
    pub fn diagnostics(&self, now: Instant) -> DiagnosticsSnapshot {
        let pressure = self.pressure(now);
        DiagnosticsSnapshot {
            speaking: self.segmenter.state() == SegmentState::Speaking,
            speaking_ms: self.segmenter.speaking_ms(now),
            active_threshold_ms: self.segmenter.active_threshold_ms(now, pressure),
            escalation_stage: self.escalation.stage(),
            shield_active: self.flow.is_active(now),
            shield_remaining_ms: self.flow.remaining_ms(now),
            dam_chunks: self.flow.dam_len(),
            dam_ms: self.flow.dam_duration_ms(),
            pending_turns: self.turns.pending_len(),
            in_flight_turns: self.turns.in_flight_len(),
            jitter_ms: self.scheduler.queued_ms(now),
            playback_rate: self.scheduler.rate(),
            macro_factor: self.renderer.macro_factor(),
            persona_tier: self.persona.current(),
            session_state: self.session_state,
            last_response_ms: self.last_response_ms,
            latency: self.latency.current_model(),
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn pressure(&self, now: Instant) -> BacklogPressure {
        BacklogPressure {
            dam_ms: self.flow.dam_duration_ms(),
            jitter_ms: self.scheduler.queued_ms(now),
        }
    }

    fn combined_backlog_ms(&self, now: Instant) -> u64 {
        self.flow.dam_duration_ms() + self.scheduler.queued_ms(now)
    }

    fn backlog_low(&self, now: Instant) -> bool {
        self.scheduler.queued_ms(now) <= self.config.drain_low_water_ms
    }

    /// A finalized turn leaves the segmenter: transmit it immediately when
    /// the shield is open, or dam it (with a deferred end-of-turn) when the
    /// remote might still be responding.
    fn dispatch_turn(&mut self, now: Instant, mut turn: Turn) -> Vec<EngineAction> {
        // The Dam owns the audio while a turn is withheld; the pending queue
        // keeps only the bookkeeping.
        let audio = std::mem::take(&mut turn.audio);
        match self.flow.gate_outbound(now, audio) {
            Some(audio) => {
                let predicted = self.latency.predict_ms(turn.duration_ms as f64).round() as u64;
                self.turns.mark_in_flight(&turn, now);
                self.flow.on_turn_dispatched(now, predicted);
                tracing::debug!(
                    turn_id = turn.id,
                    duration_ms = turn.duration_ms,
                    predicted,
                    "turn dispatched"
                );
                vec![EngineAction::SendAudio(audio), EngineAction::SendEndOfTurn]
            }
            None => {
                self.flow.defer_end_of_turn();
                self.turns.push_pending(turn);
                tracing::debug!(dam_ms = self.flow.dam_duration_ms(), "turn dammed");
                Vec::new()
            }
        }
    }

    fn on_remote_turn_complete(&mut self, now: Instant) -> Vec<EngineAction> {
        self.segmenter.close_gap();
        if let Some(sample) = self.turns.confirm_completion(now) {
            self.latency.record_sample(sample.input_ms, sample.response_ms);
            self.last_response_ms = Some(sample.response_ms);
            tracing::debug!(
                turn_id = sample.turn_id,
                response_ms = sample.response_ms,
                "turn completed"
            );
        }
        // The next inbound phrase belongs to a fresh group.
        self.group_id += 1;

        let backlog_low = self.backlog_low(now);
        match self.flow.on_remote_turn_complete(now, backlog_low) {
            Some(flush) => self.flush_actions(now, flush),
            None => Vec::new(),
        }
    }

    /// Convert a Dam release into transmit actions: the burst in order, the
    /// silence pad, then the deferred end-of-turn. The withheld turns move
    /// to in-flight and the shield is re-raised for the predicted response.
    fn flush_actions(&mut self, now: Instant, flush: DamFlush) -> Vec<EngineAction> {
        let had_chunks = !flush.chunks.is_empty();
        let mut actions: Vec<EngineAction> = flush
            .chunks
            .into_iter()
            .map(EngineAction::SendAudio)
            .collect();
        if had_chunks && !flush.silence_pad.is_empty() {
            actions.push(EngineAction::SendAudio(flush.silence_pad));
        }
        if flush.end_of_turn {
            let dispatched = self.turns.dispatch_all_pending(now);
            let total_input_ms: f64 = dispatched.iter().map(|t| t.duration_ms as f64).sum();
            let predicted = self.latency.predict_ms(total_input_ms).round() as u64;
            self.flow.on_turn_dispatched(now, predicted);
            actions.push(EngineAction::SendEndOfTurn);
        }
        actions
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session_state", &self.session_state)
            .field("live_ticket", &self.live_ticket)
            .field("pending_turns", &self.turns.pending_len())
            .field("in_flight_turns", &self.turns.in_flight_len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Async runtime shell
// ---------------------------------------------------------------------------

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::session::channel::WsSessionChannel;
use crate::session::{ConnectOptions, ReconnectPolicy, TicketGate, TransmitRing};

/// Runtime control commands.
#[derive(Debug)]
pub enum EngineCommand {
    /// Pause without tearing the session down: capture is ignored and no
    /// reconnects are attempted until `Resume`.
    Standby,
    Resume,
}

/// Connection settings for the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub endpoint: String,
    pub api_key: String,
    pub connect: ConnectOptions,
}

/// Handle to a running engine.
///
/// Capture frames go in through [`capture_tx`](Self::capture_tx); the audio
/// output callback pulls samples through [`render`](Self::render). Dropping
/// the handle does not stop the runtime; call [`shutdown`](Self::shutdown).
pub struct EngineHandle {
    engine: Arc<Mutex<Engine>>,
    capture_tx: mpsc::Sender<Vec<u8>>,
    command_tx: mpsc::Sender<EngineCommand>,
    config_tx: watch::Sender<EngineConfig>,
    notice_rx: tokio::sync::Mutex<mpsc::Receiver<EngineAction>>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Sender for captured PCM16 frames.
    pub fn capture_tx(&self) -> mpsc::Sender<Vec<u8>> {
        self.capture_tx.clone()
    }

    /// Render one output quantum; safe to call from an audio callback. The
    /// engine lock is held only for the bounded render path.
    pub fn render(&self, out: &mut [f32]) -> RenderStatus {
        let mut engine = self.engine.lock().expect("engine lock poisoned");
        engine.render(Instant::now(), out)
    }

    /// Current diagnostics snapshot.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        let engine = self.engine.lock().expect("engine lock poisoned");
        engine.diagnostics(Instant::now())
    }

    /// Swap the live configuration.
    pub fn update_config(&self, config: EngineConfig) {
        let _ = self.config_tx.send(config);
    }

    /// Enter standby.
    pub async fn standby(&self) {
        let _ = self.command_tx.send(EngineCommand::Standby).await;
    }

    /// Leave standby and reconnect.
    pub async fn resume(&self) {
        let _ = self.command_tx.send(EngineCommand::Resume).await;
    }

    /// Receive the next host-facing action (transcriptions, notices).
    pub async fn next_notice(&self) -> Option<EngineAction> {
        self.notice_rx.lock().await.recv().await
    }

    /// Stop the runtime task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// The async shell: one tokio task multiplexing capture, session events,
/// the tick, commands, and config swaps.
pub struct EngineRuntime;

impl EngineRuntime {
    /// Spawn the runtime. Returns immediately with a handle.
    pub fn spawn(config: EngineConfig, options: RuntimeOptions) -> EngineHandle {
        let engine = Arc::new(Mutex::new(Engine::new(config.clone())));
        let (capture_tx, capture_rx) = mpsc::channel::<Vec<u8>>(256);
        let (command_tx, command_rx) = mpsc::channel::<EngineCommand>(16);
        let (config_tx, config_rx) = watch::channel(config.clone());
        let (notice_tx, notice_rx) = mpsc::channel::<EngineAction>(64);
        let cancel = CancellationToken::new();

        let worker = RuntimeWorker {
            engine: engine.clone(),
            options,
            capture_rx,
            command_rx,
            config_rx,
            notice_tx,
            cancel: cancel.clone(),
            tickets: TicketGate::new(),
            ring: TransmitRing::new(config.preconnect_buffer_bytes),
            backoff: ReconnectPolicy::new(
                Duration::from_millis(config.reconnect_base_ms),
                Duration::from_millis(config.reconnect_cap_ms),
            ),
            channel: None,
            retry_at: None,
            standby: false,
        };
        tokio::spawn(worker.run());

        EngineHandle {
            engine,
            capture_tx,
            command_tx,
            config_tx,
            notice_rx: tokio::sync::Mutex::new(notice_rx),
            cancel,
        }
    }
}

struct RuntimeWorker {
    engine: Arc<Mutex<Engine>>,
    options: RuntimeOptions,
    capture_rx: mpsc::Receiver<Vec<u8>>,
    command_rx: mpsc::Receiver<EngineCommand>,
    config_rx: watch::Receiver<EngineConfig>,
    notice_tx: mpsc::Sender<EngineAction>,
    cancel: CancellationToken,
    tickets: TicketGate,
    ring: TransmitRing,
    backoff: ReconnectPolicy,
    channel: Option<WsSessionChannel>,
    /// Next reconnect attempt, checked on the tick. `None` while connected,
    /// in standby, or after a fatal error.
    retry_at: Option<Instant>,
    standby: bool,
}

impl RuntimeWorker {
    async fn run(mut self) {
        let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(256);

        let tick_ms = {
            let engine = self.engine.lock().expect("engine lock poisoned");
            engine.config().tick_ms
        };
        let mut tick = tokio::time::interval(Duration::from_millis(tick_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.connect(&event_tx).await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break;
                }

                Some(frame) = self.capture_rx.recv() => {
                    if self.standby {
                        continue;
                    }
                    let actions = {
                        let mut engine = self.engine.lock().expect("engine lock poisoned");
                        engine.on_capture_frame(Instant::now(), &frame)
                    };
                    self.perform(actions).await;
                }

                Some(event) = event_rx.recv() => {
                    self.handle_session_event(event).await;
                }

                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command, &event_tx).await;
                }

                _ = tick.tick() => {
                    if self.standby {
                        continue;
                    }
                    let now = Instant::now();
                    if self.channel.is_none() && matches!(self.retry_at, Some(at) if now >= at) {
                        self.retry_at = None;
                        self.connect(&event_tx).await;
                    }
                    let actions = {
                        let mut engine = self.engine.lock().expect("engine lock poisoned");
                        engine.tick(Instant::now())
                    };
                    self.perform(actions).await;
                }

                result = self.config_rx.changed() => {
                    if result.is_err() {
                        // All handles dropped; keep running until cancelled.
                        continue;
                    }
                    let config = self.config_rx.borrow_and_update().clone();
                    let mut engine = self.engine.lock().expect("engine lock poisoned");
                    engine.update_config(config);
                }
            }
        }

        if let Some(mut channel) = self.channel.take() {
            channel.disconnect().await;
        }
        tracing::info!("engine runtime stopped");
    }

    async fn connect(&mut self, event_tx: &mpsc::Sender<SessionEvent>) {
        let ticket = self.tickets.mint();
        let sample_rate = {
            let mut engine = self.engine.lock().expect("engine lock poisoned");
            engine.begin_connection(ticket);
            engine.config().sample_rate
        };

        match WsSessionChannel::connect(
            &self.options.endpoint,
            &self.options.api_key,
            ticket,
            &self.options.connect,
            sample_rate,
            event_tx.clone(),
        )
        .await
        {
            Ok(channel) => {
                self.backoff.reset();
                self.retry_at = None;
                // Audio captured while connecting goes out first, in order.
                if self.ring.take_overflow_notice() {
                    self.notify(EngineAction::Notice(
                        "some audio was dropped while connecting".to_string(),
                    ))
                    .await;
                }
                for chunk in self.ring.take_all() {
                    if let Ok(false) | Err(_) = channel.send_audio(&chunk).await {
                        break;
                    }
                }
                self.channel = Some(channel);
            }
            Err(e) => {
                tracing::warn!("connect failed: {e}");
                self.on_transport_failure(e.to_string()).await;
                self.schedule_retry();
            }
        }
    }

    /// Arm the next reconnect attempt; the tick performs it once due.
    fn schedule_retry(&mut self) {
        if self.standby {
            return;
        }
        let delay = self.backoff.next_delay();
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.retry_at = Some(Instant::now() + delay);
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        if !self.tickets.is_live(event.ticket) {
            return;
        }

        match &event.kind {
            SessionEventKind::Closed => {
                self.on_transport_failure("connection closed".to_string())
                    .await;
                self.schedule_retry();
                return;
            }
            SessionEventKind::Error(msg) if classify_error(msg) == ErrorClass::Fatal => {
                let msg = msg.clone();
                self.tickets.revoke();
                self.channel = None;
                self.retry_at = None;
                {
                    let mut engine = self.engine.lock().expect("engine lock poisoned");
                    engine.on_connection_lost();
                    engine.set_session_state(SessionState::Disconnected);
                }
                self.notify(EngineAction::Notice(format!("fatal session error: {msg}")))
                    .await;
                return;
            }
            _ => {}
        }

        let actions = {
            let mut engine = self.engine.lock().expect("engine lock poisoned");
            engine.on_session_event(Instant::now(), event)
        };
        self.perform(actions).await;
    }

    async fn handle_command(
        &mut self,
        command: EngineCommand,
        event_tx: &mpsc::Sender<SessionEvent>,
    ) {
        match command {
            EngineCommand::Standby => {
                self.standby = true;
                self.tickets.revoke();
                self.retry_at = None;
                if let Some(mut channel) = self.channel.take() {
                    channel.disconnect().await;
                }
                let mut engine = self.engine.lock().expect("engine lock poisoned");
                engine.on_connection_lost();
                engine.set_session_state(SessionState::Standby);
            }
            EngineCommand::Resume => {
                if self.standby {
                    self.standby = false;
                    self.connect(event_tx).await;
                }
            }
        }
    }

    async fn on_transport_failure(&mut self, reason: String) {
        tracing::warn!(reason, "transport failure");
        self.channel = None;
        let mut engine = self.engine.lock().expect("engine lock poisoned");
        engine.on_connection_lost();
        engine.set_session_state(SessionState::Recovering);
    }

    async fn perform(&mut self, actions: Vec<EngineAction>) {
        let mut transport_down = false;
        for action in actions {
            match action {
                EngineAction::SendAudio(pcm) => match &self.channel {
                    Some(channel) => match channel.send_audio(&pcm).await {
                        Ok(true) => {}
                        Ok(false) | Err(_) => {
                            self.ring.push(pcm);
                            transport_down = true;
                        }
                    },
                    None => self.ring.push(pcm),
                },
                EngineAction::SendEndOfTurn => {
                    if let Some(channel) = &self.channel {
                        if let Err(e) = channel.send_end_of_turn().await {
                            tracing::warn!("end-of-turn send failed: {e}");
                            transport_down = true;
                        }
                    }
                }
                EngineAction::SendTextSignal(text) => {
                    if let Some(channel) = &self.channel {
                        if let Err(e) = channel.send_text_signal(&text).await {
                            tracing::warn!("text signal send failed: {e}");
                        }
                    }
                }
                action @ (EngineAction::Transcription(_) | EngineAction::Notice(_)) => {
                    self.notify(action).await;
                }
            }
        }

        if transport_down {
            self.on_transport_failure("send failed".to_string()).await;
            self.schedule_retry();
        }
    }

    async fn notify(&self, action: EngineAction) {
        if let Err(e) = self.notice_tx.try_send(action) {
            tracing::debug!("notice queue full, dropping: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
