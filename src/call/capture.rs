use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::backend::CaptureFrame;
use crate::audio::codec::{float_to_pcm16, EncodedChunk};
use crate::error::CallError;
use crate::transport::TransportSender;

/// What happened to one capture frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Encoded and handed to the transport
    Sent,
    /// Discarded because the call is muted
    Muted,
    /// The transport is closed; benign during teardown
    Closed,
    /// The transport refused the chunk; capture carries on
    Dropped,
}

/// Counters updated from the capture path
#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub captured: AtomicU64,
    pub sent: AtomicU64,
    pub muted: AtomicU64,
    pub dropped: AtomicU64,
}

/// Mute-gated bridge from capture frames to the transport
///
/// The mute flag is shared with the call controller and read on every frame, so a toggle
/// applies to the very next frame.
#[derive(Clone)]
pub struct CaptureGate {
    mute: Arc<AtomicBool>,
    outbound: TransportSender,
    counters: Arc<CaptureCounters>,
}

impl CaptureGate {
    pub fn new(
        mute: Arc<AtomicBool>,
        outbound: TransportSender,
        counters: Arc<CaptureCounters>,
    ) -> Self {
        Self {
            mute,
            outbound,
            counters,
        }
    }

    /// Forward one frame unless muted. Never fails: transport trouble is counted and logged.
    pub fn forward(&self, frame: &CaptureFrame) -> FrameOutcome {
        self.counters.captured.fetch_add(1, Ordering::Relaxed);

        if self.mute.load(Ordering::Acquire) {
            self.counters.muted.fetch_add(1, Ordering::Relaxed);
            return FrameOutcome::Muted;
        }

        let chunk = EncodedChunk::mono(float_to_pcm16(&frame.samples), frame.sample_rate);
        match self.outbound.send(chunk) {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Sent
            }
            Err(CallError::SendAfterClose) => {
                debug!("Capture frame after transport close ignored");
                FrameOutcome::Closed
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping capture frame: {}", e);
                FrameOutcome::Dropped
            }
        }
    }
}

/// Running capture pipeline: drains device frames through a [`CaptureGate`]
pub struct CapturePipeline {
    task: JoinHandle<()>,
}

impl CapturePipeline {
    /// Start forwarding frames. `on_end` runs if the device stream ends on its own
    /// (not when the pipeline is stopped).
    pub fn spawn<F>(mut frames: mpsc::Receiver<CaptureFrame>, gate: CaptureGate, on_end: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            info!("Capture pipeline started");

            while let Some(frame) = frames.recv().await {
                gate.forward(&frame);
            }

            info!("Capture device stream ended");
            on_end();
        });

        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop forwarding immediately.
    pub fn stop(self) {
        self.task.abort();
        info!("Capture pipeline stopped");
    }
}
