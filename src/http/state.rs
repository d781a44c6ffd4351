use crate::call::CallHandle;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one call this process runs
    pub call: CallHandle,
}

impl AppState {
    pub fn new(call: CallHandle) -> Self {
        Self { call }
    }
}
