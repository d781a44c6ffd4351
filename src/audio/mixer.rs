//! Software mixer behind the speaker output callback.
//!
//! Voices sit on a timeline counted in device frames. Each render fills one callback
//! window, sums every voice overlapping it and reports voices that end inside it.

use super::backend::{CompletionSender, EntryId};

/// A buffer placed on the output timeline
struct Voice {
    id: EntryId,
    start_frame: u64,
    samples: Vec<f32>,
    started: bool,
}

#[derive(Default)]
pub struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place mono `samples` so they start at device frame `start_frame`.
    pub fn add(&mut self, id: EntryId, start_frame: u64, samples: Vec<f32>) {
        self.voices.push(Voice {
            id,
            start_frame,
            samples,
            started: false,
        });
    }

    /// Drop a voice without reporting a completion.
    pub fn remove(&mut self, id: EntryId) {
        self.voices.retain(|voice| voice.id != id);
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Fill `out` (interleaved, `channels` wide) with the window starting at device
    /// position `base`.
    ///
    /// A voice whose start already passed before it was first heard begins at `base`
    /// instead, so its head is delayed rather than skipped.
    pub fn render(
        &mut self,
        out: &mut [f32],
        channels: usize,
        base: u64,
        completions: &CompletionSender,
    ) {
        out.iter_mut().for_each(|s| *s = 0.0);
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let window_end = base + frames as u64;

        self.voices.retain_mut(|voice| {
            if !voice.started && voice.start_frame < base {
                voice.start_frame = base;
            }

            let voice_end = voice.start_frame + voice.samples.len() as u64;
            let from = voice.start_frame.max(base);
            let to = voice_end.min(window_end);
            for pos in from..to {
                let sample = voice.samples[(pos - voice.start_frame) as usize];
                let offset = (pos - base) as usize * channels;
                for slot in &mut out[offset..offset + channels] {
                    *slot += sample;
                }
            }
            if from < to {
                voice.started = true;
            }

            if voice_end <= window_end {
                let _ = completions.send(voice.id);
                false
            } else {
                true
            }
        });

        out.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
    }
}
