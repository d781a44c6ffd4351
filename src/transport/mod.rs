//! Bidirectional channel to the remote conversational engine
//!
//! A [`Transport`] opens a [`TransportSession`] and reports everything the engine says as
//! [`TransportEvent`]s on an unbounded channel, so the call controller sees network
//! traffic through the same loop as device and playback notifications.
//!
//! Two transports share one wire format (see [`messages`]):
//! - WebSocket straight to the engine
//! - NATS, for engines reached through a message-bus bridge

pub mod messages;
pub mod nats;
pub mod websocket;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::audio::codec::{EncodedChunk, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::config::{EngineConfig, TransportKind};
use crate::error::{CallError, Result};

pub use nats::NatsTransport;
pub use websocket::WebSocketTransport;

/// Who is speaking in a transcription delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The local user at the microphone
    User,
    /// The remote engine
    Model,
}

/// Everything the engine can tell us about a session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Channel ready; capture may begin
    Open,
    /// Engine speech, PCM16 at the output rate, mono
    AudioChunk(Vec<u8>),
    /// Partial transcription text for the given role
    TranscriptionDelta { role: Role, text: String },
    /// The current conversational turn finished
    TurnComplete,
    /// The user barged in; pending output must stop
    Interrupted,
    /// Terminal failure
    Error(String),
    /// Terminal close
    Closed,
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Closed)
    }
}

pub type TransportEventSink = mpsc::UnboundedSender<TransportEvent>;

/// Parameters sent to the engine when a session opens
#[derive(Debug, Clone)]
pub struct SessionSetup {
    /// Unique per call; used in logs and NATS subjects
    pub session_id: String,
    pub model: String,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

impl SessionSetup {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            session_id: format!("call-{}", uuid::Uuid::new_v4()),
            model: model.into(),
            voice: None,
            system_instruction: None,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }

    pub fn from_config(engine: &EngineConfig, input_rate: u32, output_rate: u32) -> Self {
        Self {
            voice: engine.voice.clone(),
            system_instruction: engine.system_instruction.clone(),
            input_sample_rate: input_rate,
            output_sample_rate: output_rate,
            ..Self::new(engine.model.clone())
        }
    }

    /// Same parameters under a fresh session id
    pub fn renewed(&self) -> Self {
        Self {
            session_id: format!("call-{}", uuid::Uuid::new_v4()),
            ..self.clone()
        }
    }
}

/// Cloneable, non-blocking send half of a session
///
/// Safe to call from the capture path: it never blocks and never panics. After the
/// session closes every send reports [`CallError::SendAfterClose`].
#[derive(Clone)]
pub struct TransportSender {
    outbound: mpsc::Sender<EncodedChunk>,
    closed: Arc<AtomicBool>,
}

impl TransportSender {
    pub fn send(&self, chunk: EncodedChunk) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CallError::SendAfterClose);
        }
        match self.outbound.try_send(chunk) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(CallError::transport(
                "outbound queue full, dropping chunk",
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::Release);
                Err(CallError::SendAfterClose)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Handle to one open engine session
///
/// Owns the transport's background tasks. [`TransportSession::close`] stops inbound
/// delivery immediately and asks the writer to close the channel gracefully.
pub struct TransportSession {
    sender: TransportSender,
    shutdown: Arc<Notify>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl TransportSession {
    /// Wrap an outbound queue and the tasks servicing it.
    ///
    /// `shutdown` is notified on close; writers should finish sending and exit on it.
    pub fn new(
        outbound: mpsc::Sender<EncodedChunk>,
        shutdown: Arc<Notify>,
        reader: Option<JoinHandle<()>>,
        writer: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            sender: TransportSender {
                outbound,
                closed: Arc::new(AtomicBool::new(false)),
            },
            shutdown,
            reader,
            writer,
        }
    }

    pub fn sender(&self) -> TransportSender {
        self.sender.clone()
    }

    pub fn send(&self, chunk: EncodedChunk) -> Result<()> {
        self.sender.send(chunk)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Close the session. No inbound events are produced after this returns.
    pub fn close(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        if self.sender.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.shutdown.notify_one();
        // The writer exits on its own after sending the close frame
        self.writer.take();
        debug!("Transport session closed");
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

/// Opens engine sessions
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Connect and send `setup`. Events (starting with `Open` once the engine is ready)
    /// are delivered on `events`.
    async fn open(&self, setup: &SessionSetup, events: TransportEventSink)
        -> Result<TransportSession>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}

/// Build the transport selected in configuration
pub fn from_config(engine: &EngineConfig) -> Arc<dyn Transport> {
    match engine.transport {
        TransportKind::Websocket => Arc::new(WebSocketTransport::from_config(engine)),
        TransportKind::Nats => Arc::new(NatsTransport::new(
            engine.nats_url.clone(),
            engine.outbound_queue,
        )),
    }
}
