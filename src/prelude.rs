// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Common re-exports for convenient use of the engine.
//!
//! ```
//! use simulex::prelude::*;
//! ```

pub use std::sync::Arc;

pub use crate::audio::probability::{
    EnergyProbabilityParams, EnergyProbabilitySource, SpeechProbabilitySource, SpeechScore,
};
pub use crate::config::EngineConfig;
pub use crate::engine::diagnostics::DiagnosticsSnapshot;
pub use crate::engine::{
    Engine, EngineAction, EngineCommand, EngineHandle, EngineRuntime, RuntimeOptions,
};
pub use crate::flow::persona::PersonaTier;
pub use crate::flow::{DamFlush, FlowController, FlowParams};
pub use crate::latency::{LatencyEstimate, LatencyModel, LatencyParams};
pub use crate::playback::renderer::{ElasticRenderer, RenderStatus, RendererParams};
pub use crate::playback::{PlaybackScheduler, SchedulerParams};
pub use crate::segmentation::escalation::{EscalationAction, EscalationStage, SilenceEscalation};
pub use crate::segmentation::{
    BacklogPressure, SegmentEvent, SegmentState, Segmenter, SegmenterParams,
};
pub use crate::session::channel::WsSessionChannel;
pub use crate::session::{
    ConnectOptions, SessionError, SessionEvent, SessionEventKind, SessionState,
};
pub use crate::turns::{CompletionSample, Turn, TurnQueue};
