use std::collections::HashMap;

use tracing::{debug, info};

use crate::audio::backend::{EntryId, PlaybackBackend};
use crate::audio::codec::pcm16_to_float;
use crate::error::Result;

/// One buffer placed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackEntry {
    pub id: EntryId,
    /// Output-clock start time, seconds
    pub start_at: f64,
    /// Seconds
    pub duration: f64,
}

impl PlaybackEntry {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Gapless scheduler for engine audio
///
/// Each chunk starts where the previous one ends, or now if playback has fallen behind.
/// The active set holds every entry scheduled but not yet finished; it is what an
/// interruption stops.
#[derive(Debug)]
pub struct PlaybackScheduler {
    next_start: f64,
    active: HashMap<EntryId, PlaybackEntry>,
    next_id: u64,
    sample_rate: u32,
}

impl PlaybackScheduler {
    /// `now` is the output clock at session start; `sample_rate` is the rate of inbound
    /// PCM chunks.
    pub fn new(now: f64, sample_rate: u32) -> Self {
        Self {
            next_start: now,
            active: HashMap::new(),
            next_id: 0,
            sample_rate,
        }
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn entry(&self, id: EntryId) -> Option<&PlaybackEntry> {
        self.active.get(&id)
    }

    /// Decode and schedule one PCM16 chunk.
    ///
    /// Returns `Ok(None)` for empty chunks, which are ignored. Malformed payloads fail with
    /// a format error and leave the scheduler untouched.
    pub fn enqueue(
        &mut self,
        output: &mut dyn PlaybackBackend,
        payload: &[u8],
    ) -> Result<Option<PlaybackEntry>> {
        let buffer = pcm16_to_float(payload, self.sample_rate, 1)?;
        if buffer.is_empty() {
            return Ok(None);
        }

        let now = output.now();
        let start_at = self.next_start.max(now);
        let duration = buffer.duration_secs();
        let id = EntryId(self.next_id);

        output.schedule(id, start_at, buffer)?;

        self.next_id += 1;
        self.next_start = start_at + duration;
        let entry = PlaybackEntry {
            id,
            start_at,
            duration,
        };
        self.active.insert(id, entry);

        debug!(
            "Scheduled entry {} at {:.3}s for {:.3}s (now {:.3}s, {} active)",
            id.0,
            start_at,
            duration,
            now,
            self.active.len()
        );
        Ok(Some(entry))
    }

    /// Record that an entry finished playing. Returns true when this drained the set,
    /// i.e. the remote side has finished speaking.
    pub fn finish(&mut self, id: EntryId) -> bool {
        self.active.remove(&id).is_some() && self.active.is_empty()
    }

    /// Barge-in: stop everything now and restart the timeline at the current clock.
    /// Returns how many entries were stopped.
    pub fn interrupt(&mut self, output: &mut dyn PlaybackBackend) -> usize {
        let stopped = self.stop_all(output);
        self.next_start = output.now();
        info!(
            "Playback interrupted: {} entries stopped, cursor reset to {:.3}s",
            stopped, self.next_start
        );
        stopped
    }

    /// Stop and forget every active entry without touching the cursor.
    pub fn stop_all(&mut self, output: &mut dyn PlaybackBackend) -> usize {
        let stopped = self.active.len();
        for (id, _) in self.active.drain() {
            output.stop(id);
        }
        stopped
    }

    /// Forget all state; used once the output device is gone.
    pub fn reset(&mut self) {
        self.active.clear();
        self.next_start = 0.0;
    }
}
