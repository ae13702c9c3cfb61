use crate::transcript::{Transcript, TranscriptId};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Write only. Used for periodic checkpoints while a stream is running.
    Checkpoint,
    /// Write and publish refresh events to subscribers.
    Full,
}

/// Where a save actually landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    pub id: TranscriptId,
    /// Title stamped onto the document when the save was redirected away
    /// from the default template.
    pub stamped_title: Option<String>,
}

impl Saved {
    pub fn in_place(id: TranscriptId) -> Self {
        Self {
            id,
            stamped_title: None,
        }
    }

    pub fn forked(&self) -> bool {
        self.stamped_title.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSummary {
    pub id: TranscriptId,
    pub display_name: String,
    pub modified: DateTime<Utc>,
}

/// Durable storage for transcripts.
#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    async fn load(&self, id: &TranscriptId) -> Result<Transcript>;

    async fn save(&self, id: &TranscriptId, transcript: &Transcript, mode: SaveMode) -> Result<Saved>;

    async fn list(&self) -> Result<Vec<TranscriptSummary>>;

    async fn delete(&self, id: &TranscriptId) -> Result<()>;
}
