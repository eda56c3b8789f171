// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Simulex - Real-time full-duplex speech-to-speech translation flow control.
//!
//! Simulex arbitrates *when* audio may flow in a live translation session
//! between a local speaker and a remote AI speech model. It does not perform
//! recognition or translation itself; it owns the local turn-taking and
//! flow-control machinery:
//!
//! - A voice-activity-driven [segmentation](segmentation) state machine with
//!   an adaptive silence threshold.
//! - A ["Shield/Dam"](flow) protocol that withholds outbound audio while the
//!   remote model might still be speaking and replays it as a single burst.
//! - An online [latency regression](latency) that sizes the shield window
//!   before any real timing data exists.
//! - A [jitter buffer and elastic scheduler](playback) for the inbound
//!   stream, with bounded pitch-preserving time stretching.
//! - [Turn bookkeeping](turns) with garbage collection of abandoned turns.
//! - A staged [silence-escalation](segmentation::escalation) protocol that
//!   injects synthetic prompts during unexpectedly long gaps.

pub mod audio;
pub mod config;
pub mod engine;
pub mod flow;
pub mod latency;
pub mod playback;
pub mod prelude;
pub mod segmentation;
pub mod session;
pub mod turns;
pub mod utils;
