use crate::store::{parse_document, read_error};
use murmur_core::{MurmurError, Result, Transcript, TranscriptId};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// An external change observed on a watched transcript.
#[derive(Debug)]
pub struct TranscriptChange {
    pub id: TranscriptId,
    pub result: Result<Transcript>,
}

/// Observes one transcript file and reports every new version of it.
///
/// The parent directory is watched rather than the file itself, because atomic
/// saves replace the file with a renamed temp file.
pub struct TranscriptWatcher {
    id: TranscriptId,
    _watcher: RecommendedWatcher,
}

impl TranscriptWatcher {
    pub fn watch(id: TranscriptId) -> Result<(Self, mpsc::UnboundedReceiver<TranscriptChange>)> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let path = id.as_path().to_path_buf();
        let file_name: OsString = path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| MurmurError::NotFound { id: id.to_string() })?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };

        let watched = id.clone();
        let mut last_seen: Option<String> = None;
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                if !event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()))
                {
                    return;
                }

                let result = match std::fs::read_to_string(&path) {
                    Ok(data) => {
                        // One save can surface as several events.
                        if last_seen.as_deref() == Some(data.as_str()) {
                            return;
                        }
                        let parsed = parse_document(&watched, &data);
                        last_seen = Some(data);
                        parsed
                    }
                    Err(e) => Err(read_error(&watched, e)),
                };

                debug!(transcript = %watched, "Transcript changed on disk");
                if sender
                    .send(TranscriptChange {
                        id: watched.clone(),
                        result,
                    })
                    .is_err()
                {
                    debug!("Transcript change receiver dropped");
                }
            }
            Err(e) => error!("File watch error: {:?}", e),
        })
        .map_err(watch_error)?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
        info!(transcript = %id, "Watching transcript for external changes");

        Ok((
            Self {
                id,
                _watcher: watcher,
            },
            receiver,
        ))
    }

    pub fn id(&self) -> &TranscriptId {
        &self.id
    }
}

fn watch_error(err: notify::Error) -> MurmurError {
    MurmurError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        err.to_string(),
    ))
}
