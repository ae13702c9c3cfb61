use crate::checkpoint::CheckpointScheduler;
use crate::tools::ToolRegistry;
use futures::StreamExt;
use murmur_core::config::{Config, SessionConfig};
use murmur_core::notification::{Notification, NotificationSink};
use murmur_core::provider::{CompletionAdapter, HistoryMessage, StreamEvent, ToolCallDelta, ToolSpec};
use murmur_core::repository::{SaveMode, Saved, TranscriptRepository};
use murmur_core::{Message, MurmurError, Result, Role, ToolCall, Transcript, TranscriptId};
use murmur_provider::AdapterFactory;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Initiated,
    Streaming,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Completed,
    Failed,
    Cancelled,
}

impl From<SessionStatus> for SessionState {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Completed => SessionState::Completed,
            SessionStatus::Failed => SessionState::Failed,
            SessionStatus::Cancelled => SessionState::Cancelled,
        }
    }
}

/// A tool call executed at the end of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub output: String,
    pub succeeded: bool,
}

/// How a session ended.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    /// Where the transcript now lives. Differs from `original_identifier`
    /// when a save forked it away from the default template.
    pub identifier: TranscriptId,
    pub original_identifier: TranscriptId,
    pub error: Option<String>,
    /// Failure of the final persist, reported separately from the stream result.
    pub persist_error: Option<String>,
    pub tool_invocations: Vec<ToolInvocation>,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    pub fn forked(&self) -> bool {
        self.identifier != self.original_identifier
    }

    pub fn response(&self) -> SessionResponse {
        SessionResponse {
            success: self.is_success(),
            new_identifier: self.forked().then(|| self.identifier.clone()),
            error: self.error.clone(),
            persist_error: self.persist_error.clone(),
        }
    }
}

/// The result shape handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_identifier: Option<TranscriptId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub checkpoint_interval: Duration,
    /// Send tool results back to the model for a follow-up round.
    pub feed_tool_results: bool,
    pub max_tool_rounds: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            checkpoint_interval: config.checkpoint_interval(),
            feed_tool_results: config.feed_tool_results,
            max_tool_rounds: config.max_tool_rounds.max(1),
        }
    }
}

/// A tool call whose fragments are still arriving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingToolCall {
    pub index: usize,
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

impl PendingToolCall {
    fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn call_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("call_{}", self.index))
    }

    /// Arguments as sent back to the model; an empty string becomes `{}`.
    pub fn arguments_json(&self) -> &str {
        if self.arguments.trim().is_empty() {
            "{}"
        } else {
            &self.arguments
        }
    }
}

/// Collects tool-call fragments by index, in index order.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn absorb(&mut self, delta: ToolCallDelta) {
        let call = self
            .calls
            .entry(delta.index)
            .or_insert_with(|| PendingToolCall::new(delta.index));
        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            call.id = Some(id);
        }
        if let Some(name) = delta.name.filter(|name| !name.is_empty()) {
            if call.name.is_empty() {
                call.name = name;
            }
        }
        call.arguments.push_str(&delta.arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn get(&self, index: usize) -> Option<&PendingToolCall> {
        self.calls.get(&index)
    }

    pub fn into_calls(self) -> Vec<PendingToolCall> {
        self.calls.into_values().collect()
    }
}

/// The history sent to the model.
///
/// Assistant turns that requested tools are kept only when every call is
/// answered by the run of tool messages directly after them, and tool
/// messages only when they answer a kept call. Everything else is kept in order.
pub fn filter_history(messages: &[Message]) -> Vec<HistoryMessage> {
    let mut kept_calls: HashSet<&str> = HashSet::new();
    let mut history = Vec::with_capacity(messages.len());

    for (position, message) in messages.iter().enumerate() {
        match message.role {
            Role::System | Role::User => history.push(HistoryMessage::from(message)),
            Role::Assistant if !message.has_tool_calls() => {
                history.push(HistoryMessage::from(message))
            }
            Role::Assistant => {
                let answered: HashSet<&str> = messages[position + 1..]
                    .iter()
                    .take_while(|later| later.role == Role::Tool)
                    .filter_map(|later| later.tool_call_id.as_deref())
                    .collect();
                if message
                    .tool_calls
                    .iter()
                    .all(|call| answered.contains(call.id.as_str()))
                {
                    kept_calls.extend(message.tool_calls.iter().map(|call| call.id.as_str()));
                    history.push(HistoryMessage::from(message));
                } else {
                    debug!(position, "Dropping assistant turn with unresolved tool calls");
                }
            }
            Role::Tool => {
                let answers_kept = message
                    .tool_call_id
                    .as_deref()
                    .map(|id| kept_calls.remove(id))
                    .unwrap_or(false);
                if answers_kept {
                    history.push(HistoryMessage::from(message));
                }
            }
        }
    }

    history
}

struct ActiveSession {
    id: TranscriptId,
    cancel: CancellationToken,
}

/// Frees the single session slot when a session ends, however it ends.
struct ActiveGuard<'a> {
    slot: &'a Mutex<Option<ActiveSession>>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Interruption {
    Cancelled,
    Failed(MurmurError),
}

/// State owned by one running session.
struct Run {
    transcript: Transcript,
    identifier: TranscriptId,
    scheduler: CheckpointScheduler,
    placeholder: usize,
    invocations: Vec<ToolInvocation>,
}

impl Run {
    fn adopt(&mut self, result: Result<Saved>) {
        match result {
            Ok(saved) => {
                if saved.id != self.identifier {
                    info!(from = %self.identifier, to = %saved.id, "Transcript forked");
                    self.identifier = saved.id;
                }
                if let Some(title) = saved.stamped_title {
                    self.transcript.title = Some(title);
                }
            }
            Err(e) => warn!(transcript = %self.identifier, error = %e, "Checkpoint failed; continuing"),
        }
    }

    fn placeholder_content(&self) -> String {
        self.transcript
            .message(self.placeholder)
            .map(|message| message.content.clone())
            .unwrap_or_default()
    }
}

/// Drives one streaming completion at a time against a transcript.
pub struct SessionManager {
    repository: Arc<dyn TranscriptRepository>,
    adapter: Arc<dyn CompletionAdapter>,
    tools: Arc<ToolRegistry>,
    notifier: Arc<dyn NotificationSink>,
    settings: SessionSettings,
    active: Mutex<Option<ActiveSession>>,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(
        repository: Arc<dyn TranscriptRepository>,
        adapter: Arc<dyn CompletionAdapter>,
        tools: Arc<ToolRegistry>,
        notifier: Arc<dyn NotificationSink>,
        settings: SessionSettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            repository,
            adapter,
            tools,
            notifier,
            settings,
            active: Mutex::new(None),
            state,
        }
    }

    /// Build a manager with the configured adapter and the built-in tools.
    #[instrument(skip_all)]
    pub fn from_config(
        config: &Config,
        repository: Arc<dyn TranscriptRepository>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let adapter = AdapterFactory::create(&config.provider).map_err(|e| MurmurError::Config {
            message: format!("Failed to create completion adapter: {}", e),
        })?;
        info!(adapter = adapter.name(), "Completion adapter ready");

        Ok(Self::new(
            repository,
            adapter,
            Arc::new(ToolRegistry::with_builtins()),
            notifier,
            SessionSettings::from(&config.session),
        ))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// The transcript of the running session, if any.
    pub fn active_transcript(&self) -> Option<TranscriptId> {
        lock(&self.active).as_ref().map(|active| active.id.clone())
    }

    /// Ask the running session to stop. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(active) => {
                info!(transcript = %active.id, "Cancellation requested");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one streaming turn against the transcript at `id`.
    ///
    /// Returns `Err` only when no session was created: another session is
    /// running, or the transcript could not be loaded. Stream failures and
    /// cancellation are reported through the outcome.
    #[instrument(skip(self, id), fields(transcript = %id))]
    pub async fn start_session(&self, id: &TranscriptId) -> Result<SessionOutcome> {
        let (cancel, guard) = self.claim(id)?;

        let transcript = self.repository.load(id).await.map_err(|e| {
            warn!(error = %e, "Failed to load transcript; no session started");
            e
        })?;
        info!(messages = transcript.len(), "Session started");

        let mut run = Run {
            transcript,
            identifier: id.clone(),
            scheduler: CheckpointScheduler::new(self.settings.checkpoint_interval),
            placeholder: 0,
            invocations: Vec::new(),
        };

        let interruption = self.drive(&mut run, &cancel).await.err();
        let persist_error = self.persist_final(&mut run).await;
        self.notify_final(&run);

        let (status, error) = match interruption {
            None => (SessionStatus::Completed, None),
            Some(Interruption::Cancelled) => (SessionStatus::Cancelled, None),
            Some(Interruption::Failed(e)) => (SessionStatus::Failed, Some(e.to_string())),
        };
        // The slot must be free before the terminal state is visible.
        drop(guard);
        self.set_state(status.into());
        info!(
            status = ?status,
            identifier = %run.identifier,
            checkpoints = run.scheduler.started(),
            "Session finished"
        );

        Ok(SessionOutcome {
            status,
            identifier: run.identifier,
            original_identifier: id.clone(),
            error,
            persist_error,
            tool_invocations: run.invocations,
        })
    }

    fn claim(&self, id: &TranscriptId) -> Result<(CancellationToken, ActiveGuard<'_>)> {
        let mut slot = lock(&self.active);
        if let Some(active) = slot.as_ref() {
            warn!(active = %active.id, requested = %id, "Rejecting session start while busy");
            return Err(MurmurError::SessionBusy {
                active: active.id.to_string(),
            });
        }

        let cancel = CancellationToken::new();
        *slot = Some(ActiveSession {
            id: id.clone(),
            cancel: cancel.clone(),
        });
        Ok((cancel, ActiveGuard { slot: &self.active }))
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        debug!(from = ?previous, to = ?state, "Session state changed");
    }

    async fn drive(
        &self,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Interruption> {
        let specs = self.tools.specs();
        let mut round = 0;

        loop {
            round += 1;
            self.set_state(SessionState::Initiated);

            let history = filter_history(&run.transcript.messages);
            run.placeholder = run.transcript.push(Message::assistant(""));
            debug!(round, index = run.placeholder, history = history.len(), "Placeholder created");
            self.notifier.notify(Notification::PlaceholderCreated {
                message_index: run.placeholder,
            });

            let pending = self.stream_round(run, history, specs.clone(), cancel).await?;
            self.set_state(SessionState::Finalizing);

            if pending.is_empty() {
                return Ok(());
            }
            self.resolve_tools(run, pending.into_calls());

            if !self.settings.feed_tool_results {
                return Ok(());
            }
            if round >= self.settings.max_tool_rounds {
                info!(round, "Tool round limit reached; not feeding results back");
                return Ok(());
            }

            // Close this round's message before the follow-up turn starts.
            self.notify_final(run);
        }
    }

    async fn stream_round(
        &self,
        run: &mut Run,
        history: Vec<HistoryMessage>,
        tools: Vec<ToolSpec>,
        cancel: &CancellationToken,
    ) -> std::result::Result<ToolCallAccumulator, Interruption> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interruption::Cancelled),
            opened = self.adapter.open(history, tools) => opened.map_err(|e| {
                error!(error = %e, "Failed to open completion stream");
                Interruption::Failed(e)
            })?,
        };
        self.set_state(SessionState::Streaming);

        let mut pending = ToolCallAccumulator::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation observed; stopping stream");
                    return Err(Interruption::Cancelled);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(StreamEvent::ContentDelta(text))) => self.apply_content(run, &text),
                Some(Ok(StreamEvent::ToolCallDelta(delta))) => pending.absorb(delta),
                Some(Ok(StreamEvent::Done)) => break,
                Some(Err(e)) => {
                    error!(error = %e, "Completion stream failed");
                    return Err(Interruption::Failed(e));
                }
                None => {
                    debug!("Completion stream ended without a completion marker");
                    break;
                }
            }
        }

        Ok(pending)
    }

    fn apply_content(&self, run: &mut Run, text: &str) {
        let Some(message) = run.transcript.message_mut(run.placeholder) else {
            return;
        };
        message.content.push_str(text);
        self.notifier.notify(Notification::Progress {
            message_index: run.placeholder,
            content: message.content.clone(),
        });

        if let Some(result) = run.scheduler.take_finished() {
            run.adopt(result);
        }
        let Run {
            scheduler,
            transcript,
            identifier,
            ..
        } = run;
        scheduler.request(&self.repository, identifier, || transcript.clone());
    }

    fn resolve_tools(&self, run: &mut Run, calls: Vec<PendingToolCall>) {
        let requested: Vec<ToolCall> = calls
            .iter()
            .map(|call| ToolCall::function(call.call_id(), call.name.clone(), call.arguments_json()))
            .collect();
        if let Some(message) = run.transcript.message_mut(run.placeholder) {
            message.tool_calls = requested;
        }

        for call in calls {
            let call_id = call.call_id();
            let (output, succeeded) = match self.tools.invoke(&call.name, call.arguments_json()) {
                Ok(output) => (output, true),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool call failed; recording failure as its output");
                    (format!("Error: {}", e), false)
                }
            };

            run.transcript
                .push(Message::tool_result(call_id.clone(), output.clone()));
            run.invocations.push(ToolInvocation {
                call_id,
                name: call.name,
                arguments: call.arguments,
                output,
                succeeded,
            });
        }
    }

    /// Final save of the session. Returns the failure text when it did not land.
    async fn persist_final(&self, run: &mut Run) -> Option<String> {
        if let Some(result) = run.scheduler.settle().await {
            run.adopt(result);
        }

        match self
            .repository
            .save(&run.identifier, &run.transcript, SaveMode::Full)
            .await
        {
            Ok(saved) => {
                run.adopt(Ok(saved));
                None
            }
            Err(e) => {
                error!(transcript = %run.identifier, error = %e, "Final persist failed");
                Some(e.to_string())
            }
        }
    }

    fn notify_final(&self, run: &Run) {
        self.notifier.notify(Notification::Final {
            message_index: run.placeholder,
            content: run.placeholder_content(),
        });
    }
}
