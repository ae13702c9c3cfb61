use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use murmur_core::config::StorageConfig;
use murmur_core::repository::{SaveMode, Saved, TranscriptRepository, TranscriptSummary};
use murmur_core::{Message, MurmurError, Result, Transcript, TranscriptId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "New Chat";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const EVENT_CAPACITY: usize = 64;

/// Refresh hints published after full saves and deletions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A save to the default template was redirected to a new transcript.
    Forked { from: TranscriptId, to: TranscriptId },
    Deleted(TranscriptId),
    /// The set of transcripts or their titles may have changed.
    ListChanged,
}

/// Stores each transcript as a JSON document inside `chats_dir`.
#[derive(Debug)]
pub struct TranscriptStore {
    chats_dir: PathBuf,
    default_template: PathBuf,
    events: broadcast::Sender<StoreEvent>,
    last_fork: Mutex<Option<DateTime<Utc>>>,
}

impl TranscriptStore {
    pub fn new(chats_dir: impl Into<PathBuf>, default_template: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            chats_dir: chats_dir.into(),
            default_template: default_template.into(),
            events,
            last_fork: Mutex::new(None),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.chats_dir.clone(), config.default_template.clone())
    }

    pub fn chats_dir(&self) -> &Path {
        &self.chats_dir
    }

    pub fn default_template(&self) -> TranscriptId {
        TranscriptId::new(self.default_template.clone())
    }

    pub fn is_default(&self, id: &TranscriptId) -> bool {
        id.as_path() == self.default_template
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Resolve a bare file name against the chats directory; paths pass through.
    pub fn resolve(&self, name: &str) -> TranscriptId {
        let path = Path::new(name);
        if path.components().count() == 1 {
            let file = if path.extension().is_some() {
                name.to_string()
            } else {
                format!("{}.json", name)
            };
            TranscriptId::new(self.chats_dir.join(file))
        } else {
            TranscriptId::new(path)
        }
    }

    /// Create the chats directory and the default template if they are missing.
    pub async fn ensure_default_template(&self) -> Result<TranscriptId> {
        fs::create_dir_all(&self.chats_dir).await?;

        let id = self.default_template();
        if fs::try_exists(&self.default_template).await? {
            return Ok(id);
        }

        let mut template = Transcript::new(Some(DEFAULT_TITLE.to_string()));
        template.push(Message::system(DEFAULT_SYSTEM_PROMPT));
        self.write_document(&id, &template).await?;
        info!(template = %id, "Created default chat template");
        Ok(id)
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Pick a fresh `chat_<timestamp>.json` target, skipping names already on disk.
    async fn allocate_fork(&self) -> Result<(TranscriptId, String)> {
        loop {
            let label = fork_label(self.next_fork_stamp());
            let path = self.chats_dir.join(format!("chat_{}.json", label));
            if !fs::try_exists(&path).await? {
                return Ok((TranscriptId::new(path), label));
            }
            debug!(path = %path.display(), "Fork target taken; trying the next timestamp");
        }
    }

    /// Reserve the next fork timestamp. Consecutive calls always return
    /// distinct, strictly increasing values.
    fn next_fork_stamp(&self) -> DateTime<Utc> {
        let mut last = self.last_fork.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stamp = Utc::now().trunc_subsecs(3);
        if let Some(previous) = *last {
            if stamp <= previous {
                stamp = previous + chrono::Duration::milliseconds(1);
            }
        }
        *last = Some(stamp);
        stamp
    }

    async fn write_document(&self, id: &TranscriptId, transcript: &Transcript) -> Result<()> {
        let document = transcript
            .to_document()
            .map_err(|e| persist_failure(id, e))?;
        write_atomically(id.as_path(), &document)
            .await
            .map_err(|e| persist_failure(id, e))
    }
}

fn fork_label(stamp: DateTime<Utc>) -> String {
    stamp.format("%Y-%m-%d_%H-%M-%S-%3f").to_string()
}

fn persist_failure(id: &TranscriptId, reason: impl std::fmt::Display) -> MurmurError {
    MurmurError::PersistFailure {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

pub(crate) fn parse_document(id: &TranscriptId, data: &str) -> Result<Transcript> {
    Transcript::parse(data).map_err(|e| MurmurError::CorruptFormat {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn read_error(id: &TranscriptId, err: std::io::Error) -> MurmurError {
    if err.kind() == ErrorKind::NotFound {
        MurmurError::NotFound { id: id.to_string() }
    } else {
        MurmurError::Io(err)
    }
}

/// Write through a synced temp file in the same directory, then rename over `path`.
async fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).await?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcript".to_string());
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

#[async_trait]
impl TranscriptRepository for TranscriptStore {
    #[instrument(skip(self), fields(transcript = %id))]
    async fn load(&self, id: &TranscriptId) -> Result<Transcript> {
        let data = fs::read_to_string(id.as_path())
            .await
            .map_err(|e| read_error(id, e))?;
        let transcript = parse_document(id, &data)?;
        debug!(messages = transcript.len(), "Loaded transcript");
        Ok(transcript)
    }

    #[instrument(skip(self, transcript), fields(transcript = %id, ?mode))]
    async fn save(&self, id: &TranscriptId, transcript: &Transcript, mode: SaveMode) -> Result<Saved> {
        if self.is_default(id) {
            let (target, label) = self.allocate_fork().await?;
            let mut forked = transcript.clone();
            forked.title = Some(label.clone());
            self.write_document(&target, &forked).await?;
            info!(to = %target, "Redirected default template save to new transcript");

            if mode == SaveMode::Full {
                self.publish(StoreEvent::Forked {
                    from: id.clone(),
                    to: target.clone(),
                });
                self.publish(StoreEvent::ListChanged);
            }
            return Ok(Saved {
                id: target,
                stamped_title: Some(label),
            });
        }

        self.write_document(id, transcript).await?;
        debug!(messages = transcript.len(), "Saved transcript");

        if mode == SaveMode::Full {
            self.publish(StoreEvent::ListChanged);
        }
        Ok(Saved::in_place(id.clone()))
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<TranscriptSummary>> {
        let mut dir = match fs::read_dir(&self.chats_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Failed to get stats for {}: {}", path.display(), e);
                    continue;
                }
            };
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());

            let id = TranscriptId::new(path);
            let title = match fs::read_to_string(id.as_path()).await {
                Ok(data) => match parse_document(&id, &data) {
                    Ok(transcript) => transcript.title,
                    Err(e) => {
                        warn!("{}", e);
                        None
                    }
                },
                Err(e) => {
                    warn!("Failed to read {}: {}", id, e);
                    None
                }
            };

            summaries.push(TranscriptSummary {
                display_name: title.unwrap_or_else(|| id.stem()),
                id,
                modified,
            });
        }

        summaries.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(summaries)
    }

    #[instrument(skip(self), fields(transcript = %id))]
    async fn delete(&self, id: &TranscriptId) -> Result<()> {
        fs::remove_file(id.as_path())
            .await
            .map_err(|e| read_error(id, e))?;
        info!("Deleted transcript");

        self.publish(StoreEvent::Deleted(id.clone()));
        self.publish(StoreEvent::ListChanged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::Role;
    use tempfile::TempDir;

    fn store_in(temp_dir: &TempDir) -> TranscriptStore {
        TranscriptStore::new(
            temp_dir.path().join("chats"),
            temp_dir.path().join("config").join("default.json"),
        )
    }

    fn sample() -> Transcript {
        let mut transcript = Transcript::new(Some("T".to_string()));
        transcript.push(Message::system("hi"));
        transcript
    }

    #[tokio::test]
    async fn test_ensure_default_template() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        let id = store.ensure_default_template().await.unwrap();
        assert!(store.is_default(&id));
        assert!(store.chats_dir().exists());

        let template = store.load(&id).await.unwrap();
        assert_eq!(template.title.as_deref(), Some(DEFAULT_TITLE));
        assert_eq!(template.messages[0].role, Role::System);
        assert_eq!(template.messages[0].content, DEFAULT_SYSTEM_PROMPT);

        // An existing template is left alone.
        let mut edited = template.clone();
        edited.push(Message::user("keep me"));
        std::fs::write(id.as_path(), edited.to_document().unwrap()).unwrap();
        store.ensure_default_template().await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let id = store.resolve("first");

        let saved = store.save(&id, &sample(), SaveMode::Full).await.unwrap();
        assert_eq!(saved.id, id);
        assert!(!saved.forked());

        let loaded = store.load(&id).await.unwrap();
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_saved_document_is_pretty_printed() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let id = store.resolve("pretty.json");

        store.save(&id, &sample(), SaveMode::Checkpoint).await.unwrap();
        let raw = std::fs::read_to_string(id.as_path()).unwrap();
        assert!(raw.starts_with("{\n  \"title\": \"T\",\n  \"messages\": ["));
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let result = store.load(&store.resolve("nope")).await;
        assert!(matches!(result, Err(MurmurError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_load_garbage_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let id = store.resolve("broken");
        std::fs::create_dir_all(store.chats_dir()).unwrap();
        std::fs::write(id.as_path(), "{\"messages\": [").unwrap();

        let result = store.load(&id).await;
        assert!(matches!(result, Err(MurmurError::CorruptFormat { .. })));
    }

    #[tokio::test]
    async fn test_fork_skips_names_already_taken() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        std::fs::create_dir_all(store.chats_dir()).unwrap();

        let reserved = Utc::now().trunc_subsecs(3) + chrono::Duration::hours(1);
        *store.last_fork.lock().unwrap() = Some(reserved);
        let taken = reserved + chrono::Duration::milliseconds(1);
        std::fs::write(
            store.chats_dir().join(format!("chat_{}.json", fork_label(taken))),
            "{}",
        )
        .unwrap();

        let (id, label) = store.allocate_fork().await.unwrap();
        assert_eq!(label, fork_label(taken + chrono::Duration::milliseconds(1)));
        assert_eq!(id.stem(), format!("chat_{}", label));
        assert!(!id.as_path().exists());
    }

    #[tokio::test]
    async fn test_default_save_forks_twice() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let template = store.ensure_default_template().await.unwrap();
        let original = std::fs::read_to_string(template.as_path()).unwrap();

        let first = store.save(&template, &sample(), SaveMode::Full).await.unwrap();
        let second = store.save(&template, &sample(), SaveMode::Full).await.unwrap();

        assert_ne!(first.id, template);
        assert_ne!(second.id, template);
        assert_ne!(first.id, second.id);

        for saved in [&first, &second] {
            let label = saved.stamped_title.clone().unwrap();
            assert_eq!(saved.id.stem(), format!("chat_{}", label));
            let loaded = store.load(&saved.id).await.unwrap();
            assert_eq!(loaded.title.as_deref(), Some(label.as_str()));
            assert_eq!(loaded.messages, sample().messages);
        }

        // The template itself is never overwritten.
        assert_eq!(std::fs::read_to_string(template.as_path()).unwrap(), original);
    }

    #[tokio::test]
    async fn test_full_save_publishes_events() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let template = store.ensure_default_template().await.unwrap();
        let mut events = store.subscribe();

        let saved = store.save(&template, &sample(), SaveMode::Full).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Forked {
                from: template.clone(),
                to: saved.id.clone()
            }
        );
        assert_eq!(events.recv().await.unwrap(), StoreEvent::ListChanged);

        store.delete(&saved.id).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Deleted(saved.id.clone())
        );
        assert_eq!(events.recv().await.unwrap(), StoreEvent::ListChanged);
    }

    #[tokio::test]
    async fn test_checkpoint_save_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let mut events = store.subscribe();

        store
            .save(&store.resolve("quiet"), &sample(), SaveMode::Checkpoint)
            .await
            .unwrap();
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_fallback_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        store
            .save(&store.resolve("older"), &sample(), SaveMode::Full)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let untitled = store.resolve("untitled");
        store
            .save(&untitled, &Transcript::default(), SaveMode::Full)
            .await
            .unwrap();
        std::fs::write(store.chats_dir().join("notes.txt"), "ignored").unwrap();
        std::fs::write(store.chats_dir().join("broken.json"), "not json").unwrap();

        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 3);
        let names: Vec<_> = summaries.iter().map(|s| s.display_name.as_str()).collect();
        assert!(names.contains(&"T"));
        assert!(names.contains(&"untitled"));
        assert!(names.contains(&"broken"));
        for pair in summaries.windows(2) {
            assert!(pair[0].modified >= pair[1].modified);
        }
    }

    #[tokio::test]
    async fn test_list_without_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let id = store.resolve("doomed");
        store.save(&id, &sample(), SaveMode::Full).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(!id.as_path().exists());
        assert!(matches!(
            store.delete(&id).await,
            Err(MurmurError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let id = store.resolve("clean");

        for n in 0..5 {
            let mut transcript = sample();
            transcript.push(Message::assistant(format!("reply {}", n)));
            store.save(&id, &transcript, SaveMode::Checkpoint).await.unwrap();
        }

        let leftovers: Vec<_> = std::fs::read_dir(store.chats_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(store.load(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_interrupted_write_keeps_last_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let id = store.resolve("crash");
        store.save(&id, &sample(), SaveMode::Checkpoint).await.unwrap();

        // A write that died before its rename leaves only a stray temp file.
        std::fs::write(
            store.chats_dir().join(".crash.json.deadbeef.tmp"),
            "{\"title\": \"T\", \"messa",
        )
        .unwrap();

        assert_eq!(store.load(&id).await.unwrap(), sample());
    }

    #[tokio::test]
    async fn test_write_failure_is_persist_failure() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        // A directory where the file should be makes the rename fail.
        let id = store.resolve("blocked.json");
        std::fs::create_dir_all(id.as_path().join("inner")).unwrap();

        let result = store.save(&id, &sample(), SaveMode::Full).await;
        assert!(matches!(result, Err(MurmurError::PersistFailure { .. })));
    }

    #[test]
    fn test_resolve() {
        let store = TranscriptStore::new("/data/chats", "/data/default.json");
        assert_eq!(
            store.resolve("chat_1"),
            TranscriptId::from("/data/chats/chat_1.json")
        );
        assert_eq!(
            store.resolve("chat_1.json"),
            TranscriptId::from("/data/chats/chat_1.json")
        );
        assert_eq!(
            store.resolve("/elsewhere/x.json"),
            TranscriptId::from("/elsewhere/x.json")
        );
    }
}
