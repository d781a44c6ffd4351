//! The call event loop.
//!
//! One tokio task owns every piece of call state. UI commands, transport events, playback
//! completions and device failures all arrive as messages and are handled to completion
//! one at a time, in whatever order the producers deliver them. The only state touched
//! outside the loop is the mute flag (read by the capture pipeline on every frame) and the
//! capture counters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::capture::{CaptureCounters, CaptureGate, CapturePipeline};
use super::playback::PlaybackScheduler;
use super::state::{CallStatus, CallTransition};
use super::stats::CallStats;
use super::transcript::{TranscriptAssembler, TranscriptEntry, TranscriptLog};
use crate::audio::backend::{
    AudioBackend, AudioDevices, CaptureFrame, CompletionSender, EntryId, FaultSender,
    PlaybackBackend,
};
use crate::config::{CallConfig, Config};
use crate::error::{CallError, Result};
use crate::transport::{
    SessionSetup, Transport, TransportEvent, TransportEventSink, TransportSession,
};

/// Everything the controller needs besides its devices and transport
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub call: CallConfig,
    /// Template for each call's engine setup; every call gets a fresh session id
    pub setup: SessionSetup,
    /// Rate of the PCM chunks the engine sends
    pub output_sample_rate: u32,
}

impl CallSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            call: config.call.clone(),
            setup: SessionSetup::from_config(
                &config.engine,
                config.audio.input_sample_rate,
                config.audio.output_sample_rate,
            ),
            output_sample_rate: config.audio.output_sample_rate,
        }
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// State exposed to the UI
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub status: CallStatus,
    pub is_muted: bool,
    pub is_remote_speaking: bool,
    /// Oldest first
    pub transcript: Vec<TranscriptEntry>,
    pub stats: CallStats,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            status: CallStatus::Idle,
            is_muted: false,
            is_remote_speaking: false,
            transcript: Vec::new(),
            stats: CallStats::default(),
        }
    }
}

enum CallCommand {
    Start(oneshot::Sender<Result<()>>),
    HangUp(oneshot::Sender<()>),
    ToggleMute(oneshot::Sender<bool>),
}

enum CallEvent {
    Connected {
        call_id: u64,
        result: Result<Connection>,
    },
    Transport {
        call_id: u64,
        event: TransportEvent,
    },
    PlaybackFinished {
        call_id: u64,
        entry: EntryId,
    },
    CaptureEnded {
        call_id: u64,
    },
    DeviceFault {
        call_id: u64,
        error: CallError,
    },
    DisplayTimeout {
        call_id: u64,
    },
}

/// Resources acquired while CONNECTING
struct Connection {
    capture: Box<dyn AudioBackend>,
    frames: mpsc::Receiver<CaptureFrame>,
    output: Box<dyn PlaybackBackend>,
    transport: TransportSession,
}

impl Connection {
    /// Give back everything of a connection nobody wants any more.
    async fn release(mut self) {
        self.transport.close();
        if let Err(e) = self.capture.stop().await {
            warn!("Failed to stop {}: {}", self.capture.name(), e);
        }
        if let Err(e) = self.output.close() {
            warn!("Failed to close {}: {}", self.output.name(), e);
        }
    }
}

/// One call attempt, from start until teardown
struct CallSession {
    call_id: u64,
    session_id: String,
    mute: Arc<AtomicBool>,
    remote_speaking: bool,
    /// Engine became ready before the connect task reported back
    open_received: bool,
    capture_device: Option<Box<dyn AudioBackend>>,
    frames: Option<mpsc::Receiver<CaptureFrame>>,
    pipeline: Option<CapturePipeline>,
    output: Option<Box<dyn PlaybackBackend>>,
    transport: Option<TransportSession>,
    playback: Option<PlaybackScheduler>,
    assembler: TranscriptAssembler,
    counters: Arc<CaptureCounters>,
}

impl CallSession {
    fn new(call_id: u64, session_id: String, counters: Arc<CaptureCounters>) -> Self {
        Self {
            call_id,
            session_id,
            mute: Arc::new(AtomicBool::new(false)),
            remote_speaking: false,
            open_received: false,
            capture_device: None,
            frames: None,
            pipeline: None,
            output: None,
            transport: None,
            playback: None,
            assembler: TranscriptAssembler::new(),
            counters,
        }
    }

    fn is_connected(&self) -> bool {
        self.transport.is_some()
    }
}

/// Owner of the call lifecycle
pub struct CallController {
    settings: CallSettings,
    devices: Arc<dyn AudioDevices>,
    transport: Arc<dyn Transport>,
    commands: mpsc::Receiver<CallCommand>,
    events_tx: mpsc::UnboundedSender<CallEvent>,
    events_rx: mpsc::UnboundedReceiver<CallEvent>,
    status: CallStatus,
    session: Option<CallSession>,
    call_seq: u64,
    transcript: TranscriptLog,
    stats: CallStats,
    counters: Arc<CaptureCounters>,
    snapshots: watch::Sender<CallSnapshot>,
}

impl CallController {
    /// Start the controller task and return a handle to drive it.
    ///
    /// The controller stops (hanging up any call) once every handle is dropped.
    pub fn spawn(
        settings: CallSettings,
        devices: Arc<dyn AudioDevices>,
        transport: Arc<dyn Transport>,
    ) -> CallHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot::default());

        let transcript = TranscriptLog::new(settings.call.transcript_cap);
        let controller = Self {
            settings,
            devices,
            transport,
            commands: command_rx,
            events_tx,
            events_rx,
            status: CallStatus::Idle,
            session: None,
            call_seq: 0,
            transcript,
            stats: CallStats::default(),
            counters: Arc::new(CaptureCounters::default()),
            snapshots: snapshot_tx,
        };

        tokio::spawn(controller.run());

        CallHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        }
    }

    async fn run(mut self) {
        info!("Call controller started ({})", self.transport.name());

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                    self.publish();
                }
            }
        }

        self.teardown(CallTransition::HangUp).await;
        info!("Call controller stopped");
    }

    async fn handle_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::Start(reply) => {
                let result = self.start();
                self.publish();
                let _ = reply.send(result);
            }
            CallCommand::HangUp(reply) => {
                if self.status.is_in_call() {
                    info!("Hang-up requested");
                    self.teardown(CallTransition::HangUp).await;
                } else {
                    debug!("Hang-up ignored in state {}", self.status);
                }
                self.publish();
                let _ = reply.send(());
            }
            CallCommand::ToggleMute(reply) => {
                let muted = self.toggle_mute();
                self.publish();
                let _ = reply.send(muted);
            }
        }
    }

    async fn handle_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Connected { call_id, result } => self.on_connected(call_id, result).await,
            CallEvent::Transport { call_id, event } => {
                if self.is_current(call_id) {
                    self.on_transport_event(event).await;
                } else {
                    debug!("Ignoring {:?} from finished call {}", event, call_id);
                }
            }
            CallEvent::PlaybackFinished { call_id, entry } => {
                if self.is_current(call_id) {
                    self.on_playback_finished(entry);
                }
            }
            CallEvent::CaptureEnded { call_id } => {
                if self.is_current(call_id) && self.status.is_active() {
                    error!("Microphone stream ended unexpectedly");
                    self.teardown(CallTransition::Failed {
                        message: "Microphone stream ended".to_string(),
                    })
                    .await;
                }
            }
            CallEvent::DeviceFault { call_id, error } => {
                if self.is_current(call_id) {
                    error!("Audio device failed: {}", error);
                    self.teardown(CallTransition::Failed {
                        message: error.to_string(),
                    })
                    .await;
                } else {
                    debug!("Ignoring device fault from finished call {}: {}", call_id, error);
                }
            }
            CallEvent::DisplayTimeout { call_id } => {
                if call_id == self.call_seq && self.session.is_none() {
                    self.transition(CallTransition::Reset);
                }
            }
        }
    }

    fn is_current(&self, call_id: u64) -> bool {
        self.session
            .as_ref()
            .map(|session| session.call_id == call_id)
            .unwrap_or(false)
    }

    fn start(&mut self) -> Result<()> {
        if !self.status.can_start() {
            warn!("Start rejected: call already {}", self.status);
            return Err(CallError::AlreadyInCall {
                status: self.status.label().to_string(),
            });
        }

        self.transition(CallTransition::Start);
        self.call_seq += 1;
        let call_id = self.call_seq;
        let setup = self.settings.setup.renewed();

        info!("Starting call {} ({})", call_id, setup.session_id);

        self.transcript.clear();
        self.counters = Arc::new(CaptureCounters::default());
        self.stats = CallStats {
            session_id: Some(setup.session_id.clone()),
            started_at: Some(Utc::now()),
            ..CallStats::default()
        };

        // Tag everything the devices and transport report with this call's id
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        forward(transport_rx, self.events_tx.clone(), move |event| {
            CallEvent::Transport { call_id, event }
        });
        forward(completion_rx, self.events_tx.clone(), move |entry| {
            CallEvent::PlaybackFinished { call_id, entry }
        });
        forward(fault_rx, self.events_tx.clone(), move |error| {
            CallEvent::DeviceFault { call_id, error }
        });

        let devices = Arc::clone(&self.devices);
        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        let connect_setup = setup.clone();
        tokio::spawn(async move {
            let result = connect(
                devices,
                transport,
                connect_setup,
                transport_tx,
                completion_tx,
                fault_tx,
            )
            .await;
            let _ = events.send(CallEvent::Connected { call_id, result });
        });

        self.session = Some(CallSession::new(
            call_id,
            setup.session_id,
            Arc::clone(&self.counters),
        ));
        Ok(())
    }

    async fn on_connected(&mut self, call_id: u64, result: Result<Connection>) {
        let wanted = self.is_current(call_id) && self.status == CallStatus::Connecting;

        match result {
            Ok(connection) if wanted => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                info!(
                    "Call {} connected: {} -> {}",
                    call_id,
                    connection.capture.name(),
                    connection.output.name()
                );
                session.playback = Some(PlaybackScheduler::new(
                    connection.output.now(),
                    self.settings.output_sample_rate,
                ));
                session.capture_device = Some(connection.capture);
                session.frames = Some(connection.frames);
                session.output = Some(connection.output);
                session.transport = Some(connection.transport);

                if session.open_received {
                    self.activate();
                }
            }
            Ok(connection) => {
                info!("Releasing resources of abandoned call {}", call_id);
                connection.release().await;
            }
            Err(e) if wanted => {
                error!("Call {} failed to connect: {}", call_id, e);
                self.teardown(CallTransition::Failed {
                    message: e.to_string(),
                })
                .await;
            }
            Err(e) => debug!("Abandoned call {} failed to connect: {}", call_id, e),
        }
    }

    /// CONNECTING -> ACTIVE: start forwarding microphone frames.
    fn activate(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(transport) = session.transport.as_ref() else {
            return;
        };
        let Some(frames) = session.frames.take() else {
            return;
        };

        let gate = CaptureGate::new(
            Arc::clone(&session.mute),
            transport.sender(),
            Arc::clone(&session.counters),
        );
        let events = self.events_tx.clone();
        let call_id = session.call_id;
        session.pipeline = Some(CapturePipeline::spawn(frames, gate, move || {
            let _ = events.send(CallEvent::CaptureEnded { call_id });
        }));

        self.transition(CallTransition::Opened);
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if session.is_connected() {
                    self.activate();
                } else {
                    session.open_received = true;
                }
            }
            TransportEvent::AudioChunk(payload) => self.on_audio_chunk(&payload).await,
            TransportEvent::TranscriptionDelta { role, text } => {
                if let Some(session) = self.session.as_mut() {
                    session.assembler.push_delta(role, &text);
                }
            }
            TransportEvent::TurnComplete => {
                if let Some(session) = self.session.as_mut() {
                    let entries = session.assembler.complete_turn(Utc::now());
                    if !entries.is_empty() {
                        self.stats.turns_completed += 1;
                        self.transcript.extend(entries);
                    }
                }
            }
            TransportEvent::Interrupted => {
                if let Some(session) = self.session.as_mut() {
                    if let (Some(playback), Some(output)) =
                        (session.playback.as_mut(), session.output.as_mut())
                    {
                        playback.interrupt(output.as_mut());
                    }
                    session.remote_speaking = false;
                    self.stats.interruptions += 1;
                }
            }
            TransportEvent::Error(detail) => {
                error!("Engine connection failed: {}", detail);
                self.teardown(CallTransition::Failed {
                    message: format!("Connection error: {}", detail),
                })
                .await;
            }
            TransportEvent::Closed => {
                if self.status.is_active() {
                    info!("Engine closed the call");
                    self.teardown(CallTransition::RemoteClosed).await;
                } else {
                    warn!("Engine closed the connection before the call started");
                    self.teardown(CallTransition::Failed {
                        message: "Engine closed the connection".to_string(),
                    })
                    .await;
                }
            }
        }
    }

    async fn on_audio_chunk(&mut self, payload: &[u8]) {
        self.stats.chunks_received += 1;

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let (Some(playback), Some(output)) = (session.playback.as_mut(), session.output.as_mut())
        else {
            debug!("Audio chunk before output is ready, dropped");
            return;
        };

        let fatal = match playback.enqueue(output.as_mut(), payload) {
            Ok(Some(_)) => {
                session.remote_speaking = true;
                None
            }
            Ok(None) => None,
            Err(e) if !e.is_fatal() => {
                warn!("Dropping audio chunk: {}", e);
                self.stats.format_errors += 1;
                None
            }
            Err(e) => Some(e),
        };

        if let Some(e) = fatal {
            error!("Playback failed: {}", e);
            self.teardown(CallTransition::Failed {
                message: e.to_string(),
            })
            .await;
        }
    }

    fn on_playback_finished(&mut self, entry: EntryId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(playback) = session.playback.as_mut() else {
            return;
        };
        if playback.entry(entry).is_none() {
            // Stopped by an interruption before its completion arrived
            return;
        }

        self.stats.chunks_played += 1;
        if playback.finish(entry) {
            debug!("Remote finished speaking");
            session.remote_speaking = false;
        }
    }

    fn toggle_mute(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            debug!("Mute toggle ignored: no call");
            return false;
        };
        if !self.status.is_active() {
            debug!("Mute toggle ignored in state {}", self.status);
            return session.mute.load(Ordering::Acquire);
        }

        let muted = !session.mute.fetch_xor(true, Ordering::AcqRel);
        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        muted
    }

    /// Release everything a call holds. Safe to call any number of times; only the first
    /// call with a live session does anything.
    async fn teardown(&mut self, transition: CallTransition) {
        let Some(mut session) = self.session.take() else {
            debug!("Teardown skipped: no live call");
            return;
        };

        info!("Tearing down call {} ({:?})", session.session_id, transition);

        // (a) close the engine channel: no more inbound or outbound audio
        if let Some(transport) = session.transport.take() {
            transport.close();
        }

        // (b) silence everything scheduled
        if let (Some(playback), Some(output)) =
            (session.playback.as_mut(), session.output.as_mut())
        {
            let stopped = playback.stop_all(output.as_mut());
            debug!("Stopped {} playback entries", stopped);
        }

        // (c) release input and output pipelines
        if let Some(pipeline) = session.pipeline.take() {
            pipeline.stop();
        }
        session.frames.take();
        if let Some(mut capture) = session.capture_device.take() {
            if let Err(e) = capture.stop().await {
                warn!("Failed to stop {}: {}", capture.name(), e);
            }
        }
        if let Some(mut output) = session.output.take() {
            if let Err(e) = output.close() {
                warn!("Failed to close {}: {}", output.name(), e);
            }
        }

        // (d) drop per-turn state
        if self.settings.call.flush_partial_on_teardown {
            let entries = session.assembler.complete_turn(Utc::now());
            self.transcript.extend(entries);
        }
        session.assembler.clear();
        if let Some(playback) = session.playback.as_mut() {
            playback.reset();
        }

        // (e) settle the status
        if let Some(started_at) = self.stats.started_at {
            self.stats.duration_secs =
                Utc::now().signed_duration_since(started_at).num_milliseconds() as f64 / 1000.0;
        }
        self.transition(transition);
        self.schedule_display_timeout();
    }

    fn schedule_display_timeout(&self) {
        if !matches!(self.status, CallStatus::Ended | CallStatus::Error { .. }) {
            return;
        }
        let call_id = self.call_seq;
        let delay = Duration::from_millis(self.settings.call.ended_display_ms);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(CallEvent::DisplayTimeout { call_id });
        });
    }

    fn transition(&mut self, transition: CallTransition) {
        match self.status.apply(transition) {
            Ok(next) => {
                info!("Call status: {} -> {}", self.status, next);
                self.status = next;
            }
            Err(e) => warn!("Ignoring invalid transition: {}", e),
        }
    }

    fn snapshot(&self) -> CallSnapshot {
        let (is_muted, is_remote_speaking) = self
            .session
            .as_ref()
            .map(|s| (s.mute.load(Ordering::Acquire), s.remote_speaking))
            .unwrap_or((false, false));

        let mut stats = self.stats.clone();
        stats.frames_captured = self.counters.captured.load(Ordering::Relaxed);
        stats.frames_sent = self.counters.sent.load(Ordering::Relaxed);
        stats.frames_muted = self.counters.muted.load(Ordering::Relaxed);
        stats.frames_dropped = self.counters.dropped.load(Ordering::Relaxed);
        if self.session.is_some() {
            if let Some(started_at) = stats.started_at {
                stats.duration_secs =
                    Utc::now().signed_duration_since(started_at).num_milliseconds() as f64 / 1000.0;
            }
        }

        CallSnapshot {
            status: self.status.clone(),
            is_muted,
            is_remote_speaking,
            transcript: self.transcript.entries(),
            stats,
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}

/// Acquire devices, then open the engine session. Anything acquired is released again if a
/// later step fails, so a failed start leaks nothing.
async fn connect(
    devices: Arc<dyn AudioDevices>,
    transport: Arc<dyn Transport>,
    setup: SessionSetup,
    transport_events: TransportEventSink,
    completions: CompletionSender,
    faults: FaultSender,
) -> Result<Connection> {
    let mut capture = devices.capture(faults.clone())?;
    info!("Acquiring {}", capture.name());
    let frames = capture.start().await?;

    let mut output = match devices.playback(completions, faults) {
        Ok(output) => output,
        Err(e) => {
            if let Err(stop_err) = capture.stop().await {
                warn!("Failed to stop {}: {}", capture.name(), stop_err);
            }
            return Err(e);
        }
    };

    let transport = match transport.open(&setup, transport_events).await {
        Ok(session) => session,
        Err(e) => {
            if let Err(stop_err) = capture.stop().await {
                warn!("Failed to stop {}: {}", capture.name(), stop_err);
            }
            if let Err(close_err) = output.close() {
                warn!("Failed to close {}: {}", output.name(), close_err);
            }
            return Err(e);
        }
    };

    Ok(Connection {
        capture,
        frames,
        output,
        transport,
    })
}

/// Relay items from a per-call channel into the controller loop.
fn forward<T, F>(
    mut rx: mpsc::UnboundedReceiver<T>,
    events: mpsc::UnboundedSender<CallEvent>,
    wrap: F,
) where
    T: Send + 'static,
    F: Fn(T) -> CallEvent + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            if events.send(wrap(item)).is_err() {
                break;
            }
        }
    });
}

/// Cloneable handle used by every front end (CLI, HTTP) to drive the call
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<CallCommand>,
    snapshots: watch::Receiver<CallSnapshot>,
}

impl CallHandle {
    /// Begin a call. Returns once the call is CONNECTING; connection failures show up in
    /// the status afterwards.
    pub async fn start_call(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(CallCommand::Start(tx)).await?;
        rx.await.map_err(|_| CallError::ControllerGone)?
    }

    pub async fn hang_up(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(CallCommand::HangUp(tx)).await?;
        rx.await.map_err(|_| CallError::ControllerGone)
    }

    /// Flip mute while ACTIVE. Returns the mute state afterwards (unchanged outside ACTIVE).
    pub async fn toggle_mute(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(CallCommand::ToggleMute(tx)).await?;
        rx.await.map_err(|_| CallError::ControllerGone)
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn status(&self) -> CallStatus {
        self.snapshots.borrow().status.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<CallSnapshot>
    where
        F: Fn(&CallSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&*snapshot) {
                    return Ok(snapshot.clone());
                }
            }
            rx.changed().await.map_err(|_| CallError::ControllerGone)?;
        }
    }

    async fn send(&self, command: CallCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CallError::ControllerGone)
    }
}
