// Test doubles for driving the call controller without hardware or network
//
// `FakeDevices` hands out a scripted microphone and a virtual speaker that count how often
// they are released. `FakeEngine` opens in-memory sessions and passes the engine side of
// each one to the test. Releases are also written to an ordered log.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use loqa_voice::audio::{
    AudioBackend, AudioDevices, CaptureFrame, CompletionSender, DecodedBuffer, EncodedChunk,
    EntryId, FaultSender, PlaybackBackend, VirtualPlayback,
};
use loqa_voice::call::{CallController, CallHandle, CallSettings, CallSnapshot};
use loqa_voice::config::CallConfig;
use loqa_voice::transport::{TransportEventSink, TransportSender};
use loqa_voice::{CallError, SessionSetup, Transport, TransportSession};
use tokio::sync::{mpsc, Notify};

/// Counts of device and transport lifecycle calls
#[derive(Default)]
pub struct Probes {
    pub capture_starts: AtomicUsize,
    pub capture_stops: AtomicUsize,
    pub playback_opens: AtomicUsize,
    pub playback_stops: AtomicUsize,
    pub playback_closes: AtomicUsize,
    pub transport_opens: AtomicUsize,
    /// Sender of the most recent engine session, watched for its close
    pub engine: Mutex<Option<TransportSender>>,
    log: Mutex<Vec<String>>,
}

impl Probes {
    /// Append a release step. A transport close seen since the last step is logged first.
    pub fn record(&self, step: &str) {
        let mut log = self.log.lock().unwrap();
        let engine_closed = self
            .engine
            .lock()
            .unwrap()
            .as_ref()
            .map(|sender| sender.is_closed())
            .unwrap_or(false);
        if engine_closed && !log.iter().any(|s| s == "transport closed") {
            log.push("transport closed".to_string());
        }
        log.push(step.to_string());
    }

    pub fn steps(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Sending half of the fake microphone
pub type MicSlot = Arc<Mutex<Option<mpsc::Sender<CaptureFrame>>>>;

pub struct FakeMicrophone {
    probes: Arc<Probes>,
    mic: MicSlot,
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioBackend for FakeMicrophone {
    async fn start(&mut self) -> loqa_voice::Result<mpsc::Receiver<CaptureFrame>> {
        let (tx, rx) = mpsc::channel(16);
        *self.mic.lock().unwrap() = Some(tx);
        self.capturing = true;
        self.probes.capture_starts.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> loqa_voice::Result<()> {
        self.capturing = false;
        self.probes.capture_stops.fetch_add(1, Ordering::SeqCst);
        self.probes.record("mic stop");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

/// Virtual output that reports stops and closes
pub struct CountingSpeaker {
    inner: VirtualPlayback,
    probes: Arc<Probes>,
}

impl PlaybackBackend for CountingSpeaker {
    fn now(&self) -> f64 {
        self.inner.now()
    }

    fn schedule(
        &mut self,
        entry: EntryId,
        start_at: f64,
        buffer: DecodedBuffer,
    ) -> loqa_voice::Result<()> {
        self.inner.schedule(entry, start_at, buffer)
    }

    fn stop(&mut self, entry: EntryId) {
        self.probes.playback_stops.fetch_add(1, Ordering::SeqCst);
        self.probes.record("speaker stop");
        self.inner.stop(entry);
    }

    fn close(&mut self) -> loqa_voice::Result<()> {
        self.probes.playback_closes.fetch_add(1, Ordering::SeqCst);
        self.probes.record("speaker close");
        self.inner.close()
    }

    fn name(&self) -> &str {
        "counting speaker"
    }
}

/// Fault channel handed to the most recent capture device
pub type FaultSlot = Arc<Mutex<Option<FaultSender>>>;

#[derive(Default)]
pub struct FakeDevices {
    pub probes: Arc<Probes>,
    pub mic: MicSlot,
    pub faults: FaultSlot,
    pub fail_capture: bool,
    pub fail_playback: bool,
}

impl AudioDevices for FakeDevices {
    fn capture(&self, faults: FaultSender) -> loqa_voice::Result<Box<dyn AudioBackend>> {
        if self.fail_capture {
            return Err(CallError::device("no microphone found"));
        }
        *self.faults.lock().unwrap() = Some(faults);
        Ok(Box::new(FakeMicrophone {
            probes: Arc::clone(&self.probes),
            mic: Arc::clone(&self.mic),
            capturing: false,
        }))
    }

    fn playback(
        &self,
        completions: CompletionSender,
        _faults: FaultSender,
    ) -> loqa_voice::Result<Box<dyn PlaybackBackend>> {
        if self.fail_playback {
            return Err(CallError::device("no speaker found"));
        }
        self.probes.playback_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSpeaker {
            inner: VirtualPlayback::new(completions),
            probes: Arc::clone(&self.probes),
        }))
    }
}

/// The engine's end of one session
pub struct EngineSide {
    pub setup: SessionSetup,
    pub events: TransportEventSink,
    pub outbound: mpsc::Receiver<EncodedChunk>,
    pub shutdown: Arc<Notify>,
}

pub struct FakeEngine {
    probes: Arc<Probes>,
    sessions: mpsc::UnboundedSender<EngineSide>,
    fail_open: bool,
}

#[async_trait::async_trait]
impl Transport for FakeEngine {
    async fn open(
        &self,
        setup: &SessionSetup,
        events: TransportEventSink,
    ) -> loqa_voice::Result<TransportSession> {
        if self.fail_open {
            return Err(CallError::transport("connection refused"));
        }
        self.probes.transport_opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        let shutdown = Arc::new(Notify::new());
        let _ = self.sessions.send(EngineSide {
            setup: setup.clone(),
            events,
            outbound: rx,
            shutdown: Arc::clone(&shutdown),
        });
        let session = TransportSession::new(tx, shutdown, None, None);
        *self.probes.engine.lock().unwrap() = Some(session.sender());
        Ok(session)
    }

    fn name(&self) -> &str {
        "fake engine"
    }
}

pub struct Harness {
    pub call: CallHandle,
    pub probes: Arc<Probes>,
    pub mic: MicSlot,
    pub faults: FaultSlot,
    pub engines: mpsc::UnboundedReceiver<EngineSide>,
}

#[derive(Default)]
pub struct HarnessOptions {
    pub fail_capture: bool,
    pub fail_playback: bool,
    pub fail_open: bool,
    pub ended_display_ms: Option<u64>,
    pub flush_partial_on_teardown: bool,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(HarnessOptions::default())
    }

    pub fn with(options: HarnessOptions) -> Self {
        let probes = Arc::new(Probes::default());
        let mic = MicSlot::default();
        let faults = FaultSlot::default();
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();

        let devices = FakeDevices {
            probes: Arc::clone(&probes),
            mic: Arc::clone(&mic),
            faults: Arc::clone(&faults),
            fail_capture: options.fail_capture,
            fail_playback: options.fail_playback,
        };
        let engine = FakeEngine {
            probes: Arc::clone(&probes),
            sessions: sessions_tx,
            fail_open: options.fail_open,
        };
        let settings = CallSettings {
            call: CallConfig {
                transcript_cap: 20,
                // Long enough that ENDED/ERROR stay visible for the whole test
                ended_display_ms: options.ended_display_ms.unwrap_or(60_000),
                flush_partial_on_teardown: options.flush_partial_on_teardown,
            },
            ..CallSettings::default()
        };

        let call = CallController::spawn(settings, Arc::new(devices), Arc::new(engine));

        Self {
            call,
            probes,
            mic,
            faults,
            engines: sessions_rx,
        }
    }

    /// Wait for the controller to open the engine session
    pub async fn engine(&mut self) -> Result<EngineSide> {
        tokio::time::timeout(Duration::from_secs(2), self.engines.recv())
            .await
            .context("engine session never opened")?
            .context("controller dropped the engine")
    }

    /// Start a call and complete the engine handshake
    pub async fn connect(&mut self) -> Result<EngineSide> {
        self.call.start_call().await?;
        let engine = self.engine().await?;
        engine.events.send(loqa_voice::TransportEvent::Open)?;
        self.wait(|s| s.status.is_active()).await?;
        Ok(engine)
    }

    pub async fn wait<F>(&self, predicate: F) -> Result<CallSnapshot>
    where
        F: Fn(&CallSnapshot) -> bool,
    {
        let snapshot = tokio::time::timeout(Duration::from_secs(2), self.call.wait_for(predicate))
            .await
            .context("timed out waiting for call state")??;
        Ok(snapshot)
    }

    /// Speak into the fake microphone
    pub async fn speak(&self, value: f32) -> Result<()> {
        let tx = self
            .mic
            .lock()
            .unwrap()
            .clone()
            .context("microphone not started")?;
        tx.send(CaptureFrame {
            samples: vec![value; 320],
            sample_rate: 16000,
            timestamp_ms: 0,
        })
        .await?;
        Ok(())
    }

    /// Unplug the fake microphone
    pub fn unplug_mic(&self) {
        self.mic.lock().unwrap().take();
    }

    /// Report a failure from the capture device's own thread, leaving its frame channel open
    pub fn device_fault(&self, message: &str) -> Result<()> {
        let faults = self
            .faults
            .lock()
            .unwrap()
            .clone()
            .context("microphone never acquired")?;
        faults.send(CallError::device(message))?;
        Ok(())
    }
}

/// Silent 24kHz PCM16 chunk lasting `secs`
pub fn engine_audio(secs: f64) -> Vec<u8> {
    vec![0u8; (secs * 24000.0).round() as usize * 2]
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F>(check: F) -> Result<()>
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("condition never became true")
}
