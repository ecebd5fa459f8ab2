//! Append-only chat transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    System,
    User,
}

/// One line of the transcript. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: u64,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line; ids are assigned in insertion order starting at 1.
    pub fn push(&mut self, sender: Sender, text: impl Into<String>) -> TranscriptEntry {
        let entry = TranscriptEntry {
            id: self.entries.len() as u64 + 1,
            text: text.into(),
            sender,
            timestamp: Utc::now(),
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, sender: Sender) -> usize {
        self.entries.iter().filter(|e| e.sender == sender).count()
    }
}
