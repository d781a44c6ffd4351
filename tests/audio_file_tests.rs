// Integration tests for WAV-driven capture
//
// These tests write small WAV files with hound and check that they are decoded, downmixed,
// resampled and streamed into fixed-size capture frames.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use loqa_voice::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioDevices, AudioFile, FileCapture,
};
use loqa_voice::config::{AudioConfig, CaptureSourceKind};
use loqa_voice::CallError;
use tempfile::TempDir;

fn write_int_wav(path: &Path, rate: u32, samples: &[i16]) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

fn write_stereo_float_wav(path: &Path, rate: u32, frames: &[(f32, f32)]) -> Result<()> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &(left, right) in frames {
        writer.write_sample(left)?;
        writer.write_sample(right)?;
    }
    writer.finalize()?;
    Ok(())
}

#[test]
fn test_audio_file_open_int() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("prompt.wav");
    write_int_wav(&path, 16000, &vec![16384; 16000])?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 16000);
    assert!((audio.duration_seconds - 1.0).abs() < 1e-9);
    assert!(audio.samples.iter().all(|s| (s - 0.5).abs() < 1e-6));
    assert!(audio.path.contains("prompt.wav"));

    Ok(())
}

#[test]
fn test_stereo_float_file_is_downmixed_and_resampled() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("stereo.wav");
    write_stereo_float_wav(&path, 48000, &vec![(0.5, -0.1); 4800])?;

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.channels, 2);
    assert_eq!(audio.samples.len(), 4800);
    assert!(audio.samples.iter().all(|s| (s - 0.2).abs() < 1e-6));

    let resampled = audio.resampled_to(16000);
    assert_eq!(resampled.len(), 1600);

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    let result = AudioFile::open(&path);

    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[tokio::test]
async fn test_file_capture_streams_frames_then_silence() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("hello.wav");
    // 0.2s of signal at 16kHz
    write_int_wav(&path, 16000, &vec![16384; 3200])?;

    let config = AudioBackendConfig {
        frame_size: 1600,
        ..AudioBackendConfig::default()
    };
    let mut capture = FileCapture::new(path, config);
    let mut frames = capture.start().await?;
    assert!(capture.is_capturing());

    let mut received = Vec::new();
    for _ in 0..3 {
        let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
            .await?
            .expect("frame");
        received.push(frame);
    }

    assert!(received.iter().all(|f| f.samples.len() == 1600));
    assert!(received.iter().all(|f| f.sample_rate == 16000));
    assert!((received[0].samples[0] - 0.5).abs() < 1e-6);
    assert!((received[1].samples[1599] - 0.5).abs() < 1e-6);
    // File exhausted: the capture keeps going with silence
    assert!(received[2].samples.iter().all(|s| *s == 0.0));
    assert_eq!(received[1].timestamp_ms, 100);

    capture.stop().await?;
    assert!(!capture.is_capturing());

    // The frame stream ends once the producer is gone
    let mut ended = false;
    for _ in 0..40 {
        match tokio::time::timeout(Duration::from_secs(2), frames.recv()).await? {
            Some(_) => continue,
            None => {
                ended = true;
                break;
            }
        }
    }
    assert!(ended, "capture kept producing after stop");

    Ok(())
}

#[tokio::test]
async fn test_file_capture_missing_file_is_device_error() {
    let mut capture = FileCapture::new(
        PathBuf::from("/nonexistent/prompt.wav"),
        AudioBackendConfig::default(),
    );

    let result = capture.start().await;
    assert!(matches!(result, Err(CallError::Device { .. })));
    assert!(!capture.is_capturing());
}

#[test]
fn test_factory_requires_input_file_for_file_source() {
    let config = AudioConfig {
        source: CaptureSourceKind::File,
        input_file: None,
        ..AudioConfig::default()
    };

    let result = AudioBackendFactory::from_config(&config);
    assert!(matches!(result, Err(CallError::Device { .. })));
}

#[test]
fn test_factory_builds_file_capture() -> Result<()> {
    let config = AudioConfig {
        source: CaptureSourceKind::File,
        input_file: Some(PathBuf::from("prompt.wav")),
        ..AudioConfig::default()
    };

    let factory = AudioBackendFactory::from_config(&config)?;
    let (faults, _fault_rx) = tokio::sync::mpsc::unbounded_channel();
    let capture = factory.capture(faults)?;
    assert!(capture.name().contains("prompt.wav"));
    assert!(!capture.is_capturing());

    Ok(())
}
