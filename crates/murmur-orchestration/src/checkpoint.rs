use futures::FutureExt;
use murmur_core::repository::{SaveMode, Saved, TranscriptRepository};
use murmur_core::{MurmurError, Result, Transcript, TranscriptId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What happened when a checkpoint was requested.
#[derive(Debug, PartialEq, Eq)]
pub enum CheckpointDecision {
    /// Interval has not elapsed yet.
    NotDue,
    /// A previous checkpoint is still being written.
    Skipped,
    Started,
}

/// Rate-limits lightweight saves while a stream is running.
///
/// At most one checkpoint write is in flight. A finished write is handed back
/// through [`CheckpointScheduler::take_finished`] or [`CheckpointScheduler::settle`]
/// so the session can adopt a forked identifier.
pub struct CheckpointScheduler {
    interval: Duration,
    last: Instant,
    in_flight: Option<(TranscriptId, JoinHandle<Result<Saved>>)>,
    started: usize,
}

impl CheckpointScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
            in_flight: None,
            started: 0,
        }
    }

    /// Due once strictly more than the interval has passed. A zero interval is always due.
    pub fn is_due(&self) -> bool {
        self.interval.is_zero() || self.last.elapsed() > self.interval
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Number of checkpoints started so far.
    pub fn started(&self) -> usize {
        self.started
    }

    /// Result of a checkpoint that has completed, if any. Never waits.
    pub fn take_finished(&mut self) -> Option<Result<Saved>> {
        if self.in_flight() {
            return None;
        }
        let (id, handle) = self.in_flight.take()?;
        handle.now_or_never().map(|joined| join_result(&id, joined))
    }

    /// Start a checkpoint of `snapshot` if one is due and none is running.
    pub fn request(
        &mut self,
        repository: &Arc<dyn TranscriptRepository>,
        id: &TranscriptId,
        snapshot: impl FnOnce() -> Transcript,
    ) -> CheckpointDecision {
        if !self.is_due() {
            return CheckpointDecision::NotDue;
        }
        if self.in_flight() {
            debug!(transcript = %id, "Checkpoint still in flight; skipping");
            return CheckpointDecision::Skipped;
        }

        let repository = Arc::clone(repository);
        let target = id.clone();
        let snapshot = snapshot();
        let handle = tokio::spawn(async move {
            repository.save(&target, &snapshot, SaveMode::Checkpoint).await
        });
        self.in_flight = Some((id.clone(), handle));
        self.last = Instant::now();
        self.started += 1;
        CheckpointDecision::Started
    }

    /// Wait for the in-flight checkpoint, if any, and return its result.
    pub async fn settle(&mut self) -> Option<Result<Saved>> {
        let (id, handle) = self.in_flight.take()?;
        Some(join_result(&id, handle.await))
    }
}

fn join_result(
    id: &TranscriptId,
    joined: std::result::Result<Result<Saved>, tokio::task::JoinError>,
) -> Result<Saved> {
    joined.unwrap_or_else(|e| {
        warn!(transcript = %id, "Checkpoint task did not complete: {}", e);
        Err(MurmurError::PersistFailure {
            id: id.to_string(),
            reason: e.to_string(),
        })
    })
}
