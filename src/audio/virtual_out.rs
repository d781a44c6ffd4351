// Headless playback backend
//
// Keeps an output clock on the tokio timer and "plays" buffers by waiting out their
// duration. Used when no speaker is wanted (servers, CI) and under a paused tokio clock
// in tests.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::backend::{CompletionSender, EntryId, PlaybackBackend};
use super::codec::DecodedBuffer;
use crate::error::{CallError, Result};

pub struct VirtualPlayback {
    origin: Instant,
    completions: CompletionSender,
    timers: HashMap<EntryId, JoinHandle<()>>,
    closed: bool,
}

impl VirtualPlayback {
    pub fn new(completions: CompletionSender) -> Self {
        info!("Virtual playback opened");
        Self {
            origin: Instant::now(),
            completions,
            timers: HashMap::new(),
            closed: false,
        }
    }

    /// Entries scheduled and not yet finished or stopped
    pub fn pending(&self) -> usize {
        self.timers.values().filter(|t| !t.is_finished()).count()
    }
}

impl PlaybackBackend for VirtualPlayback {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, entry: EntryId, start_at: f64, buffer: DecodedBuffer) -> Result<()> {
        if self.closed {
            return Err(CallError::device("virtual output already closed"));
        }

        let end_secs = (start_at + buffer.duration_secs()).max(0.0);
        let end_at = self.origin + Duration::from_secs_f64(end_secs);
        let completions = self.completions.clone();

        // Drop handles of timers that already fired so the map stays bounded
        self.timers.retain(|_, timer| !timer.is_finished());

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(end_at).await;
            let _ = completions.send(entry);
        });
        self.timers.insert(entry, timer);

        debug!(
            "Virtual playback scheduled entry {} at {:.3}s ({:.3}s)",
            entry.0,
            start_at,
            buffer.duration_secs()
        );
        Ok(())
    }

    fn stop(&mut self, entry: EntryId) {
        if let Some(timer) = self.timers.remove(&entry) {
            timer.abort();
        }
    }

    fn close(&mut self) -> Result<()> {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        if !self.closed {
            self.closed = true;
            info!("Virtual playback closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "virtual output"
    }
}

impl Drop for VirtualPlayback {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}
