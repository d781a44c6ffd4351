//! HTTP API for driving the call from another process
//!
//! - POST /call/start - Start a call
//! - POST /call/hangup - Hang up
//! - POST /call/mute - Toggle the microphone
//! - GET /call/status - Status, mute and speaking flags, stats
//! - GET /call/transcript - Transcript so far
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
