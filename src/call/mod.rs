//! Call orchestration: capture gating, playback scheduling, transcripts and the call
//! lifecycle, tied together by [`CallController`].

pub mod capture;
pub mod controller;
pub mod playback;
pub mod state;
pub mod stats;
pub mod transcript;

pub use capture::{CaptureCounters, CaptureGate, CapturePipeline, FrameOutcome};
pub use controller::{CallController, CallHandle, CallSettings, CallSnapshot};
pub use playback::{PlaybackEntry, PlaybackScheduler};
pub use state::{CallStatus, CallTransition, InvalidTransition};
pub use stats::CallStats;
pub use transcript::{TranscriptAssembler, TranscriptEntry, TranscriptLog};
