pub mod audio;
pub mod call;
pub mod config;
pub mod error;
pub mod http;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioDevices, AudioFile,
    AudioOutput, AudioSource, DecodedBuffer, EncodedChunk, FileCapture, PlaybackBackend,
    VirtualPlayback,
};
pub use call::{CallController, CallHandle, CallSettings, CallSnapshot, CallStatus};
pub use config::Config;
pub use error::{CallError, Result};
pub use http::{create_router, AppState};
pub use transport::{Role, SessionSetup, Transport, TransportEvent, TransportSession};
