// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Session channel state machine primitives.
//!
//! The connection to the remote speech model is event-driven and racy by
//! nature: opens, messages, closes, and errors arrive asynchronously, and
//! rapid reconnect/disconnect cycles would otherwise let a delayed callback
//! from a superseded connection corrupt current state. Every connect attempt
//! mints a monotonic **ticket**; every event carries the ticket it was born
//! under and is silently dropped when it no longer matches the live one.
//!
//! Errors are classified by message content: transient failures
//! (unavailable / 5xx / reset / timeout) are retried with capped exponential
//! backoff, fatal ones (auth, unimplemented) are surfaced with no retry.
//! Audio captured while the channel is still connecting is buffered in a
//! byte-capped ring, oldest dropped first, and flushed in order on open.

pub mod channel;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// A transient failure occurred; reconnecting with backoff.
    Recovering,
    /// Deliberately paused by the user; no teardown, no traffic.
    Standby,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Recovering => write!(f, "recovering"),
            Self::Standby => write!(f, "standby"),
        }
    }
}

/// Options supplied at connect time. The engine treats them as opaque.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub system_prompt: String,
    pub voice: String,
    pub transcription_enabled: bool,
    /// User-chosen languages; the first drives filler phrase selection.
    pub languages: Vec<String>,
}

/// Session channel errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("fatal session error: {0}")]
    Fatal(String),
}

// ---------------------------------------------------------------------------
// Connection tickets
// ---------------------------------------------------------------------------

/// Monotonic connection-generation counter.
///
/// `mint` is called once per connect attempt; asynchronous callbacks capture
/// the minted value and compare it against [`current`](TicketGate::current)
/// before acting.
#[derive(Debug, Default)]
pub struct TicketGate {
    live: AtomicU64,
}

impl TicketGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new ticket, superseding all previous ones.
    pub fn mint(&self) -> u64 {
        self.live.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The currently live ticket.
    pub fn current(&self) -> u64 {
        self.live.load(Ordering::SeqCst)
    }

    /// Whether events carrying `ticket` may still act.
    pub fn is_live(&self, ticket: u64) -> bool {
        ticket == self.current()
    }

    /// Invalidate the live ticket without starting a new connection.
    pub fn revoke(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Payload of a session event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// The channel opened.
    Opened,
    /// A decoded inbound audio chunk (PCM16).
    Audio(Vec<u8>),
    /// A transcription/text fragment.
    Text(String),
    /// The remote finished its speaking turn.
    TurnComplete,
    /// An error message from transport or remote.
    Error(String),
    /// The channel closed.
    Closed,
}

/// A ticketed session event.
///
/// Events from a superseded connection are dropped on dequeue by comparing
/// `ticket` against the live gate.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub ticket: u64,
    pub kind: SessionEventKind,
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Retryability of a session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with exponential backoff; invisible beyond "recovering".
    Transient,
    /// Surfaced immediately; no retry.
    Fatal,
}

/// Classify an error by its message content.
///
/// Fatal markers are checked first: an "unauthenticated" error is fatal
/// even if the transport also mentions a reset.
pub fn classify_error(message: &str) -> ErrorClass {
    let m = message.to_ascii_lowercase();
    const FATAL: &[&str] = &[
        "unauthenticated",
        "unauthorized",
        "permission denied",
        "forbidden",
        "invalid api key",
        "unimplemented",
        "not implemented",
    ];
    if FATAL.iter().any(|marker| m.contains(marker)) {
        return ErrorClass::Fatal;
    }
    const TRANSIENT: &[&str] = &[
        "unavailable",
        "500",
        "502",
        "503",
        "504",
        "reset",
        "timeout",
        "timed out",
        "connection refused",
        "broken pipe",
        "temporarily",
    ];
    if TRANSIENT.iter().any(|marker| m.contains(marker)) {
        return ErrorClass::Transient;
    }
    // Unknown errors default to transient: reconnect logic is self-healing
    // and fatal surfacing is reserved for certainty.
    ErrorClass::Transient
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Capped exponential reconnect backoff.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, doubling each call up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16);
        self.attempt += 1;
        let delay = self.base.saturating_mul(1u32 << exp);
        delay.min(self.cap)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// ---------------------------------------------------------------------------
// Pre-connect transmit ring
// ---------------------------------------------------------------------------

/// Byte-capped ring of audio captured while the channel is connecting.
///
/// Oldest chunks are discarded first on overflow; the overflow is reported
/// to the user exactly once per connection attempt.
#[derive(Debug)]
pub struct TransmitRing {
    chunks: VecDeque<Vec<u8>>,
    bytes: usize,
    cap_bytes: usize,
    overflowed: bool,
}

impl TransmitRing {
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            bytes: 0,
            cap_bytes,
            overflowed: false,
        }
    }

    /// Buffer a chunk, evicting oldest data past the cap.
    pub fn push(&mut self, chunk: Vec<u8>) {
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.bytes > self.cap_bytes {
            match self.chunks.pop_front() {
                Some(dropped) => {
                    self.bytes -= dropped.len();
                    self.overflowed = true;
                    tracing::warn!(dropped = dropped.len(), "transmit ring overflow, oldest chunk dropped");
                }
                None => break,
            }
        }
    }

    /// Drain all buffered chunks in order.
    pub fn take_all(&mut self) -> Vec<Vec<u8>> {
        self.bytes = 0;
        self.chunks.drain(..).collect()
    }

    /// One-time overflow notice; returns `true` at most once per overflow.
    pub fn take_overflow_notice(&mut self) -> bool {
        std::mem::take(&mut self.overflowed)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_gate_supersedes() {
        let gate = TicketGate::new();
        let t1 = gate.mint();
        assert!(gate.is_live(t1));
        let t2 = gate.mint();
        assert!(t2 > t1);
        assert!(!gate.is_live(t1), "superseded ticket must be stale");
        assert!(gate.is_live(t2));
        gate.revoke();
        assert!(!gate.is_live(t2));
    }

    #[test]
    fn test_classify_transient_errors() {
        for msg in [
            "UNAVAILABLE: connection reset by peer",
            "HTTP 503 Service Unavailable",
            "deadline timeout exceeded",
            "connection refused",
            "server returned 502",
        ] {
            assert_eq!(classify_error(msg), ErrorClass::Transient, "{msg}");
        }
    }

    #[test]
    fn test_classify_fatal_errors() {
        for msg in [
            "UNAUTHENTICATED: invalid API key",
            "401 Unauthorized",
            "UNIMPLEMENTED: method not available",
            "permission denied for model",
        ] {
            assert_eq!(classify_error(msg), ErrorClass::Fatal, "{msg}");
        }
    }

    #[test]
    fn test_fatal_wins_over_transient_markers() {
        assert_eq!(
            classify_error("unauthenticated: stream reset"),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_unknown_errors_default_to_transient() {
        assert_eq!(classify_error("something odd happened"), ErrorClass::Transient);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(500), Duration::from_secs(15));
        assert_eq!(policy.next_delay(), Duration::from_millis(500));
        assert_eq!(policy.next_delay(), Duration::from_millis(1_000));
        assert_eq!(policy.next_delay(), Duration::from_millis(2_000));
        for _ in 0..10 {
            policy.next_delay();
        }
        assert_eq!(policy.next_delay(), Duration::from_secs(15));
        policy.reset();
        assert_eq!(policy.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_transmit_ring_drops_oldest() {
        let mut ring = TransmitRing::new(100);
        ring.push(vec![1u8; 40]);
        ring.push(vec![2u8; 40]);
        assert!(!ring.take_overflow_notice());
        ring.push(vec![3u8; 40]);
        // 120 bytes > 100: the oldest chunk goes.
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.bytes(), 80);
        assert!(ring.take_overflow_notice());
        assert!(!ring.take_overflow_notice(), "notice must be one-time");

        let drained = ring.take_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0][0], 2);
        assert_eq!(drained[1][0], 3);
        assert!(ring.is_empty());
    }
}
