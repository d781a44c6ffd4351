use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about the current (or most recent) call
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CallStats {
    /// Engine session identifier
    pub session_id: Option<String>,

    /// When the call was started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since start, frozen once the call ends
    pub duration_secs: f64,

    /// Frames delivered by the input device
    pub frames_captured: u64,

    /// Frames encoded and handed to the transport
    pub frames_sent: u64,

    /// Frames discarded while muted
    pub frames_muted: u64,

    /// Frames the transport refused
    pub frames_dropped: u64,

    /// Audio chunks received from the engine
    pub chunks_received: u64,

    /// Chunks that played to completion
    pub chunks_played: u64,

    /// Malformed chunks dropped
    pub format_errors: u64,

    /// Barge-in interruptions
    pub interruptions: u64,

    /// Turns that produced at least one transcript entry
    pub turns_completed: u64,
}
