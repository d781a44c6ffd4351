use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, CaptureFrame, FrameAssembler};
use super::codec::{downmix, resample_linear};
use crate::error::CallError;

/// WAV file decoded to mono float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let samples = downmix(&interleaved, spec.channels as usize);
        let duration_seconds = samples.len() as f64 / spec.sample_rate as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels",
            duration_seconds, spec.sample_rate, spec.channels
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples resampled to `rate`
    pub fn resampled_to(&self, rate: u32) -> Vec<f32> {
        resample_linear(&self.samples, self.sample_rate, rate)
    }
}

/// Capture backend that plays a WAV file into the call as if it came from a microphone.
///
/// Frames are released at the real-time rate; once the file is exhausted the backend keeps
/// producing silence so the engine can answer.
pub struct FileCapture {
    path: PathBuf,
    config: AudioBackendConfig,
    task: Option<JoinHandle<()>>,
    name: String,
}

impl FileCapture {
    pub fn new(path: PathBuf, config: AudioBackendConfig) -> Self {
        let name = format!("WAV file ({})", path.display());
        Self {
            path,
            config,
            task: None,
            name,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileCapture {
    async fn start(&mut self) -> crate::error::Result<mpsc::Receiver<CaptureFrame>> {
        if self.task.is_some() {
            return Err(CallError::device("Already capturing"));
        }

        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .map_err(|e| CallError::device(format!("WAV loader panicked: {}", e)))?
            .map_err(|e| CallError::device(format!("{:#}", e)))?;

        let rate = self.config.input_sample_rate;
        let frame_size = self.config.frame_size;
        let samples = audio.resampled_to(rate);
        let (tx, rx) = mpsc::channel(self.config.capture_queue);

        let frame_period = Duration::from_secs_f64(frame_size as f64 / rate.max(1) as f64);

        let task = tokio::spawn(async move {
            let mut assembler = FrameAssembler::new(frame_size, rate);
            let mut ticker = tokio::time::interval(frame_period);
            let mut cursor = 0usize;
            let silence = vec![0.0f32; frame_size];

            loop {
                ticker.tick().await;

                let block = if cursor < samples.len() {
                    let end = (cursor + frame_size).min(samples.len());
                    let block = &samples[cursor..end];
                    cursor = end;
                    block
                } else {
                    &silence[..]
                };

                for frame in assembler.push(block) {
                    if tx.send(frame).await.is_err() {
                        debug!("Capture receiver dropped, stopping file playback");
                        return;
                    }
                }
            }
        });

        self.task = Some(task);
        info!("File capture started: {} ({}Hz)", self.path.display(), rate);

        Ok(rx)
    }

    async fn stop(&mut self) -> crate::error::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
