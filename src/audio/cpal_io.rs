//! Microphone capture and speaker playback using CPAL.
//!
//! Both directions open the device at its default configuration and convert in software:
//! capture downmixes and resamples to the engine input rate, playback resamples decoded
//! engine audio to the device rate and duplicates it across output channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::backend::{
    AudioBackend, AudioBackendConfig, CaptureFrame, CompletionSender, EntryId, FaultSender,
    FrameAssembler, PlaybackBackend,
};
use super::codec::{downmix, resample_linear, DecodedBuffer};
use super::mixer::Mixer;
use crate::error::{CallError, Result};

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only created, paused and dropped by its owning backend, which is
/// itself owned by a single task at a time. The audio callbacks never touch the wrapper.
/// Shared access from `CpalCapture` (whose trait requires Sync) goes through a Mutex.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

fn find_input_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| CallError::device(format!("Failed to enumerate input devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CallError::device(format!("Input device not found: {}", name))),
        None => host
            .default_input_device()
            .ok_or_else(|| CallError::device("No default input device")),
    }
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| CallError::device(format!("Failed to enumerate output devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CallError::device(format!("Output device not found: {}", name))),
        None => host
            .default_output_device()
            .ok_or_else(|| CallError::device("No default output device")),
    }
}

/// Microphone capture backend
pub struct CpalCapture {
    config: AudioBackendConfig,
    stream: Option<Mutex<SendableStream>>,
    dropped_frames: Arc<AtomicU64>,
    faults: FaultSender,
}

impl CpalCapture {
    pub fn new(config: AudioBackendConfig, faults: FaultSender) -> Self {
        Self {
            config,
            stream: None,
            dropped_frames: Arc::new(AtomicU64::new(0)),
            faults,
        }
    }

    /// Frames discarded because the pipeline fell behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn build_stream(&self, tx: mpsc::Sender<CaptureFrame>) -> Result<cpal::Stream> {
        let device = find_input_device(self.config.input_device.as_deref())?;
        let default_config = device
            .default_input_config()
            .map_err(|e| CallError::device(format!("Failed to query input config: {}", e)))?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.config.input_sample_rate;
        let stream_config: cpal::StreamConfig = default_config.config();

        info!(
            "Microphone: {} ({}ch/{}Hz/{:?})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            native_channels,
            native_rate,
            default_config.sample_format()
        );

        let assembler = Arc::new(Mutex::new(FrameAssembler::new(
            self.config.frame_size,
            target_rate,
        )));
        let dropped = Arc::clone(&self.dropped_frames);

        // Device callbacks are converted, framed and pushed without blocking
        let deliver = move |samples: &[f32]| {
            let mono = downmix(samples, native_channels);
            let converted = resample_linear(&mono, native_rate, target_rate);
            let frames = match assembler.lock() {
                Ok(mut assembler) => assembler.push(&converted),
                Err(_) => return,
            };
            for frame in frames {
                if tx.try_send(frame).is_err() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        };

        // Device loss never closes the frame channel, so it has to be reported
        let faults = self.faults.clone();
        let err_callback = move |err: cpal::StreamError| {
            error!("Input stream error: {}", err);
            let _ = faults.send(CallError::device(format!("Microphone failed: {}", err)));
        };

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(data),
                err_callback,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    deliver(&floats)
                },
                err_callback,
                None,
            ),
            format => {
                return Err(CallError::device(format!(
                    "Unsupported input sample format: {:?}",
                    format
                )))
            }
        };

        stream.map_err(|e| CallError::device(format!("Failed to build input stream: {}", e)))
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureFrame>> {
        if self.stream.is_some() {
            return Err(CallError::device("Already capturing"));
        }

        let (tx, rx) = mpsc::channel(self.config.capture_queue);
        let stream = self.build_stream(tx)?;
        stream
            .play()
            .map_err(|e| CallError::device(format!("Failed to start input stream: {}", e)))?;

        self.stream = Some(Mutex::new(SendableStream(stream)));
        info!("Microphone capture started");
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let stream = stream.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(e) = stream.0.pause() {
                warn!("Failed to pause input stream: {}", e);
            }
            info!(
                "Microphone capture stopped ({} frames dropped)",
                self.dropped_frames()
            );
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

/// Output callback body; renders silence if the mixer lock is poisoned.
fn render(
    mixer: &Mutex<Mixer>,
    out: &mut [f32],
    channels: usize,
    base: u64,
    completions: &CompletionSender,
) {
    match mixer.lock() {
        Ok(mut mixer) => mixer.render(out, channels, base, completions),
        Err(_) => out.iter_mut().for_each(|s| *s = 0.0),
    }
}

/// Speaker playback backend
pub struct CpalPlayback {
    stream: Option<SendableStream>,
    mixer: Arc<Mutex<Mixer>>,
    frames_played: Arc<AtomicU64>,
    device_rate: u32,
}

impl CpalPlayback {
    pub fn open(
        config: AudioBackendConfig,
        completions: CompletionSender,
        faults: FaultSender,
    ) -> Result<Self> {
        let device = find_output_device(config.output_device.as_deref())?;
        let default_config = device
            .default_output_config()
            .map_err(|e| CallError::device(format!("Failed to query output config: {}", e)))?;

        let device_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.config();

        info!(
            "Speaker: {} ({}ch/{}Hz/{:?})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            channels,
            device_rate,
            default_config.sample_format()
        );

        let mixer = Arc::new(Mutex::new(Mixer::new()));
        let frames_played = Arc::new(AtomicU64::new(0));
        let err_callback = move |err: cpal::StreamError| {
            error!("Output stream error: {}", err);
            let _ = faults.send(CallError::device(format!("Speaker failed: {}", err)));
        };

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => {
                let mixer = Arc::clone(&mixer);
                let played = Arc::clone(&frames_played);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let base = played.load(Ordering::Acquire);
                        render(&mixer, data, channels, base, &completions);
                        played.fetch_add((data.len() / channels) as u64, Ordering::Release);
                    },
                    err_callback,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let mixer = Arc::clone(&mixer);
                let played = Arc::clone(&frames_played);
                let mut scratch: Vec<f32> = Vec::new();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0.0);
                        let base = played.load(Ordering::Acquire);
                        render(&mixer, &mut scratch, channels, base, &completions);
                        for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                            *out = (s * 32767.0) as i16;
                        }
                        played.fetch_add((data.len() / channels) as u64, Ordering::Release);
                    },
                    err_callback,
                    None,
                )
            }
            format => {
                return Err(CallError::device(format!(
                    "Unsupported output sample format: {:?}",
                    format
                )))
            }
        }
        .map_err(|e| CallError::device(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| CallError::device(format!("Failed to start output stream: {}", e)))?;

        Ok(Self {
            stream: Some(SendableStream(stream)),
            mixer,
            frames_played,
            device_rate,
        })
    }
}

impl PlaybackBackend for CpalPlayback {
    fn now(&self) -> f64 {
        self.frames_played.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, entry: EntryId, start_at: f64, buffer: DecodedBuffer) -> Result<()> {
        if self.stream.is_none() {
            return Err(CallError::device("speaker already closed"));
        }

        let samples = resample_linear(&buffer.to_mono(), buffer.sample_rate, self.device_rate);
        let start_frame = (start_at * self.device_rate as f64).round().max(0.0) as u64;

        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| CallError::device("playback mixer poisoned"))?;
        // The device may have moved on since the caller read the clock
        let start_frame = start_frame.max(self.frames_played.load(Ordering::Acquire));
        mixer.add(entry, start_frame, samples);

        debug!("Scheduled entry {} at frame {}", entry.0, start_frame);
        Ok(())
    }

    fn stop(&mut self, entry: EntryId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.remove(entry);
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.clear();
        }
        if let Some(stream) = self.stream.take() {
            stream
                .0
                .pause()
                .map_err(|e| CallError::device(format!("Failed to stop output stream: {}", e)))?;
            info!("Speaker playback closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}
