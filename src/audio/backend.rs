use std::path::PathBuf;

use tokio::sync::mpsc;

use super::codec::{DecodedBuffer, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::config::{AudioConfig, CaptureSourceKind, OutputKind};
use crate::error::{CallError, Result};

/// Fixed-size block of mono input samples, as delivered by a capture backend
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Float samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration shared by capture and playback backends
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Rate frames are delivered at (resampled if the device differs)
    pub input_sample_rate: u32,
    /// Rate of decoded engine audio handed to playback
    pub output_sample_rate: u32,
    /// Samples per capture frame
    pub frame_size: usize,
    /// Frames buffered between the device callback and the capture pipeline
    pub capture_queue: usize,
    /// Input device name (None = system default)
    pub input_device: Option<String>,
    /// Output device name (None = system default)
    pub output_device: Option<String>,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_size: 4096,
            capture_queue: 32,
            input_device: None,
            output_device: None,
        }
    }
}

impl From<&AudioConfig> for AudioBackendConfig {
    fn from(config: &AudioConfig) -> Self {
        Self {
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            frame_size: config.frame_size.max(1),
            capture_queue: config.capture_queue.max(1),
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
        }
    }
}

/// Splits arbitrarily sized device callbacks into fixed-size capture frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    emitted_samples: u64,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size.max(1)),
            emitted_samples: 0,
        }
    }

    /// Buffer `samples` and return every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<CaptureFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let samples = std::mem::replace(&mut self.pending, rest);
            let timestamp_ms = self.emitted_samples * 1000 / self.sample_rate.max(1) as u64;
            self.emitted_samples += samples.len() as u64;
            frames.push(CaptureFrame {
                samples,
                sample_rate: self.sample_rate,
                timestamp_ms,
            });
        }
        frames
    }

    /// Samples waiting for a frame to fill up
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - cpal microphone (feature `cpal-audio`)
/// - WAV file streamed in real time (for headless runs and tests)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive fixed-size frames
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Identifier of one scheduled playback buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

/// Where playback backends report entries that finished playing naturally
pub type CompletionSender = mpsc::UnboundedSender<EntryId>;

/// Where backends report failures raised on device threads after they started.
/// Each report ends the call that owns the device.
pub type FaultSender = mpsc::UnboundedSender<CallError>;

/// Audio output with its own clock, able to start buffers at precise times
///
/// Time is expressed in seconds on the output clock, which starts at zero when the
/// backend is opened and only moves forward.
pub trait PlaybackBackend: Send {
    /// Current output-clock time in seconds
    fn now(&self) -> f64;

    /// Begin playing `buffer` at `start_at` on the output clock.
    ///
    /// When the buffer finishes, `entry` is sent on the backend's completion channel.
    fn schedule(&mut self, entry: EntryId, start_at: f64, buffer: DecodedBuffer) -> Result<()>;

    /// Stop an entry immediately. No completion is reported for it.
    fn stop(&mut self, entry: EntryId);

    /// Release the output device. Pending entries are dropped without completion.
    fn close(&mut self) -> Result<()>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Source of the devices a call needs; one capture and one playback backend per call
pub trait AudioDevices: Send + Sync {
    fn capture(&self, faults: FaultSender) -> Result<Box<dyn AudioBackend>>;

    fn playback(
        &self,
        completions: CompletionSender,
        faults: FaultSender,
    ) -> Result<Box<dyn PlaybackBackend>>;
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Microphone input (cpal)
    Microphone,
    /// WAV file streamed as if captured live
    File(PathBuf),
}

/// Audio output type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutput {
    /// Default speaker (cpal)
    Speaker,
    /// Headless output driven by the tokio clock
    Virtual,
}

/// Audio backend factory
///
/// Builds backends from configuration; the cpal variants need the `cpal-audio` feature.
#[derive(Debug, Clone)]
pub struct AudioBackendFactory {
    source: AudioSource,
    output: AudioOutput,
    config: AudioBackendConfig,
}

impl AudioBackendFactory {
    pub fn new(source: AudioSource, output: AudioOutput, config: AudioBackendConfig) -> Self {
        Self {
            source,
            output,
            config,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Result<Self> {
        let source = match config.source {
            CaptureSourceKind::Microphone => AudioSource::Microphone,
            CaptureSourceKind::File => {
                let path = config.input_file.clone().ok_or_else(|| {
                    CallError::device("audio.source = \"file\" requires audio.input_file")
                })?;
                AudioSource::File(path)
            }
        };
        let output = match config.output {
            OutputKind::Speaker => AudioOutput::Speaker,
            OutputKind::Virtual => AudioOutput::Virtual,
        };
        Ok(Self::new(source, output, AudioBackendConfig::from(config)))
    }
}

impl AudioDevices for AudioBackendFactory {
    fn capture(&self, faults: FaultSender) -> Result<Box<dyn AudioBackend>> {
        match &self.source {
            AudioSource::Microphone => {
                #[cfg(feature = "cpal-audio")]
                {
                    Ok(Box::new(super::cpal_io::CpalCapture::new(
                        self.config.clone(),
                        faults,
                    )))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    let _ = faults;
                    Err(CallError::device(
                        "microphone capture requires the `cpal-audio` feature",
                    ))
                }
            }

            AudioSource::File(path) => Ok(Box::new(super::file::FileCapture::new(
                path.clone(),
                self.config.clone(),
            ))),
        }
    }

    fn playback(
        &self,
        completions: CompletionSender,
        faults: FaultSender,
    ) -> Result<Box<dyn PlaybackBackend>> {
        match self.output {
            AudioOutput::Speaker => {
                #[cfg(feature = "cpal-audio")]
                {
                    let backend = super::cpal_io::CpalPlayback::open(
                        self.config.clone(),
                        completions,
                        faults,
                    )?;
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    let _ = (completions, faults);
                    Err(CallError::device(
                        "speaker playback requires the `cpal-audio` feature",
                    ))
                }
            }

            AudioOutput::Virtual => Ok(Box::new(super::virtual_out::VirtualPlayback::new(
                completions,
            ))),
        }
    }
}
