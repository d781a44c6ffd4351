use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub engine: EngineConfig,
    pub call: CallConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSourceKind {
    Microphone,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Speaker,
    Virtual,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Samples per capture frame
    pub frame_size: usize,
    pub source: CaptureSourceKind,
    /// WAV file streamed when `source = "file"`
    pub input_file: Option<PathBuf>,
    pub input_device: Option<String>,
    pub output: OutputKind,
    pub output_device: Option<String>,
    /// Frames buffered between the device and the capture pipeline
    pub capture_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            frame_size: 4096,
            source: CaptureSourceKind::Microphone,
            input_file: None,
            input_device: None,
            output: OutputKind::Speaker,
            output_device: None,
            capture_queue: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    Nats,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transport: TransportKind,
    /// WebSocket endpoint of the conversational engine
    pub url: String,
    /// Environment variable holding the engine API key, appended as `key=` when set
    pub api_key_env: Option<String>,
    pub model: String,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
    pub nats_url: String,
    /// Encoded chunks buffered for the transport writer before frames are dropped
    pub outbound_queue: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Websocket,
            url: "ws://127.0.0.1:9000/live".to_string(),
            api_key_env: None,
            model: "models/live-audio".to_string(),
            voice: None,
            system_instruction: None,
            nats_url: "nats://localhost:4222".to_string(),
            outbound_queue: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Maximum transcript entries kept; oldest are evicted first
    pub transcript_cap: usize,
    /// How long ENDED/ERROR is shown before returning to IDLE
    pub ended_display_ms: u64,
    /// Flush unfinished turn text into the transcript when a call is torn down
    pub flush_partial_on_teardown: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            transcript_cap: 20,
            ended_display_ms: 2000,
            flush_partial_on_teardown: false,
        }
    }
}

impl Config {
    /// Load from an optional config file (any format the `config` crate understands)
    /// overlaid with `LOQA_VOICE__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("LOQA_VOICE").separator("__"))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }
}
