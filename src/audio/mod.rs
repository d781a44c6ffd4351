pub mod backend;
pub mod codec;
pub mod file;
pub mod mixer;
pub mod virtual_out;

#[cfg(feature = "cpal-audio")]
pub mod cpal_io;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioDevices, AudioOutput,
    AudioSource, CaptureFrame, CompletionSender, EntryId, FaultSender, FrameAssembler,
    PlaybackBackend,
};
pub use codec::{
    float_to_pcm16, pcm16_to_float, DecodedBuffer, EncodedChunk, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE,
};
pub use file::{AudioFile, FileCapture};
pub use mixer::Mixer;
pub use virtual_out::VirtualPlayback;
