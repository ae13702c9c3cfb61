#![allow(dead_code)]

use async_trait::async_trait;
use murmur_core::notification::{ChannelNotifier, Notification};
use murmur_core::repository::{SaveMode, Saved, TranscriptRepository, TranscriptSummary};
use murmur_core::{MurmurError, Result, Transcript, TranscriptId};
use murmur_orchestration::{SessionManager, SessionSettings, SessionState, ToolRegistry};
use murmur_provider::ScriptedAdapter;
use murmur_store::TranscriptStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

pub struct Fixture {
    _temp: TempDir,
    pub store: Arc<TranscriptStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(TranscriptStore::new(
            temp.path().join("chats"),
            temp.path().join("default.json"),
        ));
        Self { _temp: temp, store }
    }

    /// Write a raw JSON document into the chats directory.
    pub fn seed(&self, name: &str, document: &str) -> TranscriptId {
        let id = self.store.resolve(name);
        std::fs::create_dir_all(self.store.chats_dir()).unwrap();
        std::fs::write(id.as_path(), document).unwrap();
        id
    }

    pub fn read_json(&self, id: &TranscriptId) -> serde_json::Value {
        let data = std::fs::read_to_string(id.as_path()).unwrap();
        serde_json::from_str(&data).unwrap()
    }
}

pub const SEED_DOCUMENT: &str = r#"{"title":"T","messages":[{"role":"system","content":"hi"}]}"#;

/// Delegates to a store while counting saves by mode. Can be told to fail full saves.
pub struct CountingRepository {
    inner: Arc<TranscriptStore>,
    pub checkpoints: AtomicUsize,
    pub full_saves: AtomicUsize,
    pub fail_full: AtomicBool,
}

impl CountingRepository {
    pub fn new(inner: Arc<TranscriptStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            checkpoints: AtomicUsize::new(0),
            full_saves: AtomicUsize::new(0),
            fail_full: AtomicBool::new(false),
        })
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.load(Ordering::SeqCst)
    }

    pub fn full_count(&self) -> usize {
        self.full_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptRepository for CountingRepository {
    async fn load(&self, id: &TranscriptId) -> Result<Transcript> {
        self.inner.load(id).await
    }

    async fn save(&self, id: &TranscriptId, transcript: &Transcript, mode: SaveMode) -> Result<Saved> {
        match mode {
            SaveMode::Checkpoint => self.checkpoints.fetch_add(1, Ordering::SeqCst),
            SaveMode::Full => self.full_saves.fetch_add(1, Ordering::SeqCst),
        };
        if mode == SaveMode::Full && self.fail_full.load(Ordering::SeqCst) {
            return Err(MurmurError::PersistFailure {
                id: id.to_string(),
                reason: "disk full".to_string(),
            });
        }
        self.inner.save(id, transcript, mode).await
    }

    async fn list(&self) -> Result<Vec<TranscriptSummary>> {
        self.inner.list().await
    }

    async fn delete(&self, id: &TranscriptId) -> Result<()> {
        self.inner.delete(id).await
    }
}

pub fn build_manager(
    repository: Arc<dyn TranscriptRepository>,
    adapter: Arc<ScriptedAdapter>,
    settings: SessionSettings,
) -> (Arc<SessionManager>, mpsc::UnboundedReceiver<Notification>) {
    let (notifier, notifications) = ChannelNotifier::new();
    let manager = SessionManager::new(
        repository,
        adapter,
        Arc::new(ToolRegistry::with_builtins()),
        Arc::new(notifier),
        settings,
    );
    (Arc::new(manager), notifications)
}

pub async fn wait_for_state(states: &mut watch::Receiver<SessionState>, wanted: SessionState) {
    while *states.borrow_and_update() != wanted {
        states.changed().await.unwrap();
    }
}

pub fn drain(notifications: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut received = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        received.push(notification);
    }
    received
}
