//! Error types for the call pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallError {
    /// Microphone or speaker unavailable. Fatal to call start.
    #[error("Audio device error: {message}")]
    Device { message: String },

    /// Connect, send or receive failure on the engine channel. Fatal to the current call.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Malformed codec input. The offending frame or chunk is dropped.
    #[error("Malformed audio payload: {message}")]
    Format { message: String },

    #[error("Send attempted after the transport closed")]
    SendAfterClose,

    #[error("A call is already in progress ({status})")]
    AlreadyInCall { status: String },

    #[error("Call controller is no longer running")]
    ControllerGone,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CallError {
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Whether this error ends the current call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Device { .. } | Self::Transport { .. } | Self::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
