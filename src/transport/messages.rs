//! Engine wire format (JSON).
//!
//! Client -> engine:
//! - `{"setup": {...}}` once per session
//! - `{"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": <b64>}]}}`
//!
//! Engine -> client:
//! - `{"setupComplete": {}}` when the session is ready
//! - `{"serverContent": {"modelTurn": {"parts": [{"inlineData": ...}]},
//!   "inputTranscription": {"text": ...}, "outputTranscription": {"text": ...},
//!   "interrupted": true, "turnComplete": true}}`
//! - `{"error": {"message": ...}}` on engine-side failure
//!
//! Over NATS, audio additionally travels as [`AudioFrameMessage`] with sequence numbers.

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Role, SessionSetup, TransportEvent};
use crate::audio::codec::EncodedChunk;
use crate::error::{CallError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Empty object enabling a feature (e.g. transcription)
#[derive(Debug, Default, Serialize)]
pub struct Enabled {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub input_audio_transcription: Enabled,
    pub output_audio_transcription: Enabled,
}

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

impl SetupMessage {
    pub fn new(setup: &SessionSetup) -> Self {
        Self {
            setup: Setup {
                model: setup.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: setup.voice.as_ref().map(|voice| SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.clone(),
                            },
                        },
                    }),
                },
                system_instruction: setup.system_instruction.as_ref().map(|text| Content {
                    parts: vec![Part {
                        text: Some(text.clone()),
                        inline_data: None,
                    }],
                }),
                input_audio_transcription: Enabled::default(),
                output_audio_transcription: Enabled::default(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

impl RealtimeInputMessage {
    pub fn from_chunk(chunk: &EncodedChunk) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: chunk.mime_type(),
                    data: base64::engine::general_purpose::STANDARD.encode(&chunk.payload),
                }],
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineErrorBody {
    #[serde(default)]
    pub message: String,
}

/// Any message the engine may send; unknown fields are ignored
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
    pub error: Option<EngineErrorBody>,
}

impl ServerMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CallError::format(format!("invalid engine message: {}", e)))
    }

    /// Translate into transport events.
    ///
    /// Order within one message: interruption first (so it never cancels audio carried
    /// alongside it), then audio, user text, model text, and turn completion last.
    /// Audio parts that fail to decode are dropped with a warning.
    pub fn into_events(self) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(TransportEvent::Open);
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(TransportEvent::Interrupted);
            }

            for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
                let Some(blob) = part.inline_data else {
                    continue;
                };
                if !blob.mime_type.starts_with("audio/pcm") {
                    debug!("Ignoring non-PCM inline data ({})", blob.mime_type);
                    continue;
                }
                match base64::engine::general_purpose::STANDARD.decode(blob.data.as_bytes()) {
                    Ok(bytes) => events.push(TransportEvent::AudioChunk(bytes)),
                    Err(e) => warn!("Dropping audio chunk with invalid base64: {}", e),
                }
            }

            if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
                events.push(TransportEvent::TranscriptionDelta {
                    role: Role::User,
                    text: t.text,
                });
            }
            if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
                events.push(TransportEvent::TranscriptionDelta {
                    role: Role::Model,
                    text: t.text,
                });
            }

            if content.turn_complete {
                events.push(TransportEvent::TurnComplete);
            }
        }

        if self.go_away.is_some() {
            debug!("Engine announced it will disconnect soon");
        }

        if let Some(error) = self.error {
            events.push(TransportEvent::Error(error.message));
        }

        events
    }
}

/// Audio frame message published over NATS
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u32,
    pub pcm: String, // Base64-encoded PCM bytes
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: String, // RFC3339 timestamp
    #[serde(rename = "final")]
    pub final_frame: bool,
}

impl AudioFrameMessage {
    pub fn from_chunk(session_id: &str, sequence: u32, chunk: &EncodedChunk) -> Self {
        Self {
            session_id: session_id.to_string(),
            sequence,
            pcm: base64::engine::general_purpose::STANDARD.encode(&chunk.payload),
            sample_rate: chunk.sample_rate_hz,
            channels: chunk.channels,
            timestamp: chrono::Utc::now().to_rfc3339(),
            final_frame: false,
        }
    }

    /// End-of-stream marker sent when the session closes
    pub fn final_marker(session_id: &str, sequence: u32, sample_rate: u32) -> Self {
        Self {
            session_id: session_id.to_string(),
            sequence,
            pcm: String::new(),
            sample_rate,
            channels: 1,
            timestamp: chrono::Utc::now().to_rfc3339(),
            final_frame: true,
        }
    }
}
