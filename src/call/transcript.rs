use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::Role;

/// One finished utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered transcript capped at a fixed number of entries; the oldest go first.
#[derive(Debug, Clone)]
pub struct TranscriptLog {
    cap: usize,
    entries: VecDeque<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        if self.cap == 0 {
            return;
        }
        while self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = TranscriptEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries oldest first
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Collects transcription deltas for the turn in progress
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    user: String,
    model: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_delta(&mut self, role: Role, text: &str) {
        match role {
            Role::User => self.user.push_str(text),
            Role::Model => self.model.push_str(text),
        }
    }

    /// Text accumulated so far for `role`
    pub fn pending(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user,
            Role::Model => &self.model,
        }
    }

    /// Close the turn: one entry per non-empty buffer, user before model.
    pub fn complete_turn(&mut self, now: DateTime<Utc>) -> Vec<TranscriptEntry> {
        let mut entries = Vec::with_capacity(2);
        for (role, buffer) in [(Role::User, &mut self.user), (Role::Model, &mut self.model)] {
            if !buffer.is_empty() {
                entries.push(TranscriptEntry {
                    role,
                    text: std::mem::take(buffer),
                    timestamp: now,
                });
            }
        }
        entries
    }

    pub fn clear(&mut self) {
        self.user.clear();
        self.model.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }
}
