// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! WebSocket session channel to the remote speech model.
//!
//! Streams captured turns upstream and receives synthesized translation
//! audio downstream over a single WebSocket. Outbound audio is base64-coded
//! JSON; inbound messages are parsed with a lightweight type-only envelope
//! first, then a full parse for the hot audio path. A background reader task
//! tags every inbound message with the connection ticket it was born under
//! and pushes it onto the engine's event queue; the engine drops anything
//! stale.
//!
//! # Required dependencies (add to Cargo.toml)
//!
//! ```toml
//! tokio-tungstenite = { version = "0.24", features = ["native-tls"] }
//! futures-util = "0.3"
//! base64 = "0.22"
//! url = "2"
//! ```

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::session::{ConnectOptions, SessionError, SessionEvent, SessionEventKind};

// ---------------------------------------------------------------------------
// Wire message types
// ---------------------------------------------------------------------------

/// Lightweight envelope to extract just the message type without allocating
/// a full serde_json::Value tree.
#[derive(Deserialize)]
struct WireTypeOnly {
    #[serde(rename = "type")]
    msg_type: Option<String>,
}

/// Inbound synthesized audio chunk.
#[derive(Debug, Deserialize)]
struct WireAudio {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    msg_type: String,
    /// Base64-coded PCM16.
    audio: String,
}

/// Inbound transcription/text fragment.
#[derive(Debug, Deserialize)]
struct WireText {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    msg_type: String,
    text: String,
}

/// Inbound error report.
#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    msg_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Outbound session setup, sent once right after the socket opens.
#[derive(Debug, Serialize)]
struct WireSetup<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    system_prompt: &'a str,
    voice: &'a str,
    transcription: bool,
    languages: &'a [String],
    sample_rate: u32,
}

/// Outbound audio chunk.
#[derive(Debug, Serialize)]
struct WireInputAudio<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    audio: &'a str,
}

/// Outbound end-of-turn marker.
#[derive(Debug, Serialize)]
struct WireEndOfTurn {
    #[serde(rename = "type")]
    msg_type: &'static str,
}

/// Outbound text signal (persona instructions, repeat requests, fillers).
#[derive(Debug, Serialize)]
struct WireTextSignal<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    text: &'a str,
}

// ---------------------------------------------------------------------------
// Type aliases for the WebSocket split halves
// ---------------------------------------------------------------------------

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ---------------------------------------------------------------------------
// WsSessionChannel
// ---------------------------------------------------------------------------

/// One WebSocket connection generation to the remote speech model.
///
/// A channel is single-use: it is created by `connect` with the ticket the
/// caller minted, lives until `disconnect` or a transport failure, and is
/// replaced wholesale on reconnect. All inbound traffic arrives as ticketed
/// [`SessionEvent`]s on the queue passed to `connect`.
pub struct WsSessionChannel {
    /// Ticket this connection generation was minted under.
    ticket: u64,
    /// Write half of the WebSocket connection.
    ws_sender: Arc<Mutex<WsSink>>,
    /// Handle for the background task that reads WebSocket messages.
    ws_reader_task: Option<JoinHandle<()>>,
}

impl WsSessionChannel {
    /// Establish the connection, send the session setup message, and spawn
    /// the reader task. Inbound events land on `event_tx` tagged with
    /// `ticket`; the `Opened` event is pushed once setup succeeds.
    pub async fn connect(
        endpoint: &str,
        api_key: &str,
        ticket: u64,
        options: &ConnectOptions,
        sample_rate: u32,
        event_tx: tokio::sync::mpsc::Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let url = Url::parse(endpoint)
            .map_err(|e| SessionError::Transport(format!("invalid endpoint: {e}")))?;
        tracing::debug!(%url, ticket, "session channel connecting");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::Transport(format!("failed to build request: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Token {api_key}"))
                .map_err(|e| SessionError::Transport(format!("invalid api key header: {e}")))?,
        );

        let ws_result =
            tokio::time::timeout(std::time::Duration::from_secs(10), connect_async(request)).await;
        let (ws_stream, _response) = match ws_result {
            Ok(Ok((stream, resp))) => (stream, resp),
            Ok(Err(e)) => {
                return Err(SessionError::Transport(format!("connection failed: {e}")));
            }
            Err(_) => {
                return Err(SessionError::Transport(
                    "connection timed out after 10s".to_string(),
                ));
            }
        };

        tracing::debug!(ticket, "session channel established");

        let (sink, stream) = ws_stream.split();
        let sender = Arc::new(Mutex::new(sink));

        // Session setup goes out before any audio.
        let setup = serde_json::to_string(&WireSetup {
            msg_type: "setup",
            system_prompt: &options.system_prompt,
            voice: &options.voice,
            transcription: options.transcription_enabled,
            languages: &options.languages,
            sample_rate,
        })
        .map_err(|e| SessionError::Transport(format!("setup serialization failed: {e}")))?;
        {
            let mut sink = sender.lock().await;
            sink.send(Message::Text(setup))
                .await
                .map_err(|e| SessionError::Transport(format!("setup send failed: {e}")))?;
        }

        let reader_tx = event_tx.clone();
        let reader_handle = tokio::spawn(async move {
            Self::ws_reader_loop(stream, ticket, reader_tx).await;
        });

        let _ = event_tx
            .send(SessionEvent {
                ticket,
                kind: SessionEventKind::Opened,
            })
            .await;

        Ok(Self {
            ticket,
            ws_sender: sender,
            ws_reader_task: Some(reader_handle),
        })
    }

    /// The ticket this connection generation carries.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Background task that reads WebSocket messages and converts them into
    /// ticketed session events.
    async fn ws_reader_loop(
        mut stream: WsStream,
        ticket: u64,
        event_tx: tokio::sync::mpsc::Sender<SessionEvent>,
    ) {
        let send = |kind: SessionEventKind| {
            let tx = event_tx.clone();
            async move {
                if let Err(e) = tx.send(SessionEvent { ticket, kind }).await {
                    tracing::warn!(ticket, "session event queue closed: {e}");
                }
            }
        };

        while let Some(msg_result) = stream.next().await {
            let msg = match msg_result {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!(ticket, "session read error: {e}");
                    send(SessionEventKind::Error(e.to_string())).await;
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    if let Some(kind) = Self::parse_wire_message(&text) {
                        send(kind).await;
                    }
                }
                Message::Binary(bytes) => {
                    // Some backends push raw PCM16 frames instead of the JSON
                    // envelope.
                    send(SessionEventKind::Audio(bytes)).await;
                }
                Message::Close(close_frame) => {
                    tracing::debug!(ticket, ?close_frame, "session closed by server");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // Pings are handled automatically by tungstenite.
                }
                Message::Frame(_) => {}
            }
        }

        send(SessionEventKind::Closed).await;
        tracing::debug!(ticket, "session reader loop ended");
    }

    /// Parse one inbound text message into an event kind, or `None` when it
    /// carries nothing actionable.
    fn parse_wire_message(text: &str) -> Option<SessionEventKind> {
        let envelope: WireTypeOnly = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("failed to parse session message: {e}: {text}");
                return None;
            }
        };

        match envelope.msg_type.as_deref().unwrap_or("") {
            "audio" => match serde_json::from_str::<WireAudio>(text) {
                Ok(audio) => {
                    match base64::engine::general_purpose::STANDARD.decode(&audio.audio) {
                        Ok(pcm) if !pcm.is_empty() => Some(SessionEventKind::Audio(pcm)),
                        Ok(_) => None,
                        Err(e) => {
                            tracing::warn!("failed to decode audio payload: {e}");
                            None
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to parse audio message: {e}");
                    None
                }
            },
            "text" => match serde_json::from_str::<WireText>(text) {
                Ok(t) if !t.text.is_empty() => Some(SessionEventKind::Text(t.text)),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("failed to parse text message: {e}");
                    None
                }
            },
            "turn_complete" => Some(SessionEventKind::TurnComplete),
            "error" => match serde_json::from_str::<WireError>(text) {
                Ok(err) => {
                    let description = err
                        .description
                        .or(err.message)
                        .unwrap_or_else(|| "unknown remote error".to_string());
                    tracing::error!("error from remote: {description}");
                    Some(SessionEventKind::Error(description))
                }
                Err(e) => {
                    tracing::error!("failed to parse error message: {e}: {text}");
                    Some(SessionEventKind::Error(text.to_string()))
                }
            },
            other => {
                tracing::trace!("unhandled session message type: {other}");
                None
            }
        }
    }

    /// Send a PCM16 audio chunk. Returns `Ok(false)` when the send failed in
    /// a way that warrants a reconnect.
    pub async fn send_audio(&self, pcm: &[u8]) -> Result<bool, SessionError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(pcm);
        let payload = serde_json::to_string(&WireInputAudio {
            msg_type: "input_audio",
            audio: &encoded,
        })
        .map_err(|e| SessionError::Transport(format!("audio serialization failed: {e}")))?;

        let mut sink = self.ws_sender.lock().await;
        match sink.send(Message::Text(payload)).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!(ticket = self.ticket, "failed to send audio: {e}");
                Ok(false)
            }
        }
    }

    /// Mark the end of the current input turn.
    pub async fn send_end_of_turn(&self) -> Result<(), SessionError> {
        let payload = serde_json::to_string(&WireEndOfTurn {
            msg_type: "end_of_turn",
        })
        .map_err(|e| SessionError::Transport(e.to_string()))?;
        let mut sink = self.ws_sender.lock().await;
        sink.send(Message::Text(payload))
            .await
            .map_err(|e| SessionError::Transport(format!("end-of-turn send failed: {e}")))
    }

    /// Push a one-shot text signal (persona instruction, repeat request,
    /// filler phrase).
    pub async fn send_text_signal(&self, text: &str) -> Result<(), SessionError> {
        let payload = serde_json::to_string(&WireTextSignal {
            msg_type: "text_signal",
            text,
        })
        .map_err(|e| SessionError::Transport(e.to_string()))?;
        let mut sink = self.ws_sender.lock().await;
        sink.send(Message::Text(payload))
            .await
            .map_err(|e| SessionError::Transport(format!("text signal send failed: {e}")))
    }

    /// Close the socket gracefully and wait for the reader task.
    pub async fn disconnect(&mut self) {
        {
            let mut sink = self.ws_sender.lock().await;
            if let Err(e) = sink.close().await {
                tracing::debug!(ticket = self.ticket, "error closing sink: {e}");
            }
        }

        if let Some(handle) = self.ws_reader_task.take() {
            let abort_handle = handle.abort_handle();
            let timeout_result =
                tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
            match timeout_result {
                Ok(Ok(())) => {
                    tracing::debug!(ticket = self.ticket, "reader task finished cleanly");
                }
                Ok(Err(e)) => {
                    tracing::warn!(ticket = self.ticket, "reader task panicked: {e}");
                }
                Err(_) => {
                    tracing::warn!(ticket = self.ticket, "reader task timed out, aborting");
                    abort_handle.abort();
                }
            }
        }

        tracing::debug!(ticket = self.ticket, "session channel disconnected");
    }
}

impl fmt::Debug for WsSessionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSessionChannel")
            .field("ticket", &self.ticket)
            .field("reader_running", &self.ws_reader_task.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
