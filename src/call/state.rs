//! Call state machine.

use std::fmt;

use serde::Serialize;

/// Lifecycle of the call shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallStatus {
    #[default]
    Idle,
    /// Devices acquired or being acquired, engine not ready yet
    Connecting,
    /// Audio flowing both ways
    Active,
    /// Call finished normally; shown briefly before returning to idle
    Ended,
    /// Call failed; `message` is shown to the user
    Error { message: String },
}

impl CallStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Connecting or active: a call holds resources
    pub fn is_in_call(&self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }

    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Ended | Self::Error { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Error { .. } => "error",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error { message } => write!(f, "error: {}", message),
            other => f.write_str(other.label()),
        }
    }
}

/// State transitions for calls.
#[derive(Debug, Clone)]
pub enum CallTransition {
    Start,
    /// Transport reported the engine ready
    Opened,
    HangUp,
    /// Engine closed the channel
    RemoteClosed,
    /// Fatal device or transport failure
    Failed { message: String },
    /// Display timeout after ENDED/ERROR
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot apply {} in state {}", self.attempted, self.current_state)
    }
}

impl std::error::Error for InvalidTransition {}

impl CallStatus {
    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply(&self, transition: CallTransition) -> Result<CallStatus, InvalidTransition> {
        let next = match (self, transition) {
            (Self::Idle | Self::Ended | Self::Error { .. }, CallTransition::Start) => {
                Self::Connecting
            }
            (Self::Connecting, CallTransition::Opened) => Self::Active,
            (
                Self::Connecting | Self::Active,
                CallTransition::HangUp | CallTransition::RemoteClosed,
            ) => Self::Ended,
            (_, CallTransition::Failed { message }) => Self::Error { message },
            (Self::Ended | Self::Error { .. }, CallTransition::Reset) => Self::Idle,
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: current.label().to_string(),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        Ok(next)
    }
}
