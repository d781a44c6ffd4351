//! 16-bit linear PCM codec.
//!
//! Samples are little-endian `i16`. Encoding scales by 32768 and truncates toward zero,
//! saturating at the `i16` range instead of wrapping; decoding divides by 32768.

use crate::error::{CallError, Result};

/// Input rate expected by the engine (microphone side)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Rate of the audio the engine sends back
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

const PCM16_SCALE: f32 = 32768.0;

/// PCM16 payload plus its declared format, the unit exchanged with the transport
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    /// Little-endian i16 samples, interleaved
    pub payload: Vec<u8>,
    pub sample_rate_hz: u32,
    pub channels: u16,
}

impl EncodedChunk {
    pub fn mono(payload: Vec<u8>, sample_rate_hz: u32) -> Self {
        Self {
            payload,
            sample_rate_hz,
            channels: 1,
        }
    }

    /// MIME type announcing this chunk's format to the engine
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate_hz)
    }
}

/// Decoded float samples (interleaved) ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedBuffer {
    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Average interleaved channels down to mono.
    pub fn to_mono(&self) -> Vec<f32> {
        downmix(&self.samples, self.channels.max(1) as usize)
    }
}

/// Encode float samples in [-1, 1] to PCM16 bytes.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * PCM16_SCALE).trunc();
        let value = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode PCM16 bytes into float samples.
///
/// Fails with [`CallError::Format`] when the byte count is odd or does not hold a whole
/// number of frames for `channels`.
pub fn pcm16_to_float(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedBuffer> {
    if channels == 0 {
        return Err(CallError::format("channel count must be at least 1"));
    }
    if bytes.len() % 2 != 0 {
        return Err(CallError::format(format!(
            "odd byte count {} for 16-bit samples",
            bytes.len()
        )));
    }
    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(CallError::format(format!(
            "{} bytes is not a whole number of {}-channel frames",
            bytes.len(),
            channels
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect();

    Ok(DecodedBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Linear-interpolation resampler for mono signals.
///
/// Good enough for speech between device and engine rates; not a band-limited resampler.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}

/// Mix interleaved multi-channel samples down to mono by averaging.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
