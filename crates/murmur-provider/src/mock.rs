use async_trait::async_trait;
use futures::{stream, StreamExt};
use murmur_core::provider::{
    CompletionAdapter, EventStream, HistoryMessage, StreamEvent, ToolCallDelta, ToolSpec,
};
use murmur_core::{MurmurError, Result, Role};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Simple fallback adapter that echoes the last user message.
/// Useful for development when no external provider credentials are configured.
#[derive(Debug, Default)]
pub struct MockCompletionAdapter;

#[async_trait]
impl CompletionAdapter for MockCompletionAdapter {
    async fn open(&self, history: Vec<HistoryMessage>, _tools: Vec<ToolSpec>) -> Result<EventStream> {
        let reply = generate_reply(&history);
        // Simulate incremental output.
        let events: Vec<Result<StreamEvent>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(StreamEvent::ContentDelta(word.to_string())))
            .chain(std::iter::once(Ok(StreamEvent::Done)))
            .collect();
        Ok(Box::new(stream::iter(events)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn generate_reply(history: &[HistoryMessage]) -> String {
    match history.iter().rev().find(|m| m.role == Role::User) {
        Some(last) => format!("(offline mode) I received: \"{}\"", last.content.trim()),
        None => "I'm running without a configured provider. Set OPENAI_API_KEY to get live responses."
            .to_string(),
    }
}

/// One step of a scripted completion stream.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(StreamEvent),
    /// Yield an adapter failure and end the stream.
    Fail(String),
    Delay(Duration),
    /// Never yield again; the stream stays open until dropped.
    Hang,
}

impl ScriptStep {
    pub fn content(text: impl Into<String>) -> Self {
        ScriptStep::Event(StreamEvent::ContentDelta(text.into()))
    }

    pub fn tool_call(index: usize, id: &str, name: &str, arguments: &str) -> Self {
        ScriptStep::Event(StreamEvent::ToolCallDelta(ToolCallDelta {
            index,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: arguments.to_string(),
        }))
    }

    /// A continuation fragment that only carries more argument text.
    pub fn arguments(index: usize, arguments: &str) -> Self {
        ScriptStep::Event(StreamEvent::ToolCallDelta(ToolCallDelta {
            index,
            arguments: arguments.to_string(),
            ..Default::default()
        }))
    }

    pub fn done() -> Self {
        ScriptStep::Event(StreamEvent::Done)
    }
}

#[derive(Debug)]
enum Turn {
    Stream(Vec<ScriptStep>),
    Refuse(String),
}

/// Plays back prepared turns, one per `open`, and records what it was sent.
#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<(Vec<HistoryMessage>, Vec<ToolSpec>)>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turn(self, steps: Vec<ScriptStep>) -> Self {
        lock(&self.turns).push_back(Turn::Stream(steps));
        self
    }

    /// Queue a turn whose `open` call itself fails.
    pub fn with_refusal(self, message: impl Into<String>) -> Self {
        lock(&self.turns).push_back(Turn::Refuse(message.into()));
        self
    }

    pub fn histories(&self) -> Vec<Vec<HistoryMessage>> {
        lock(&self.requests).iter().map(|(h, _)| h.clone()).collect()
    }

    pub fn tool_names(&self) -> Vec<Vec<String>> {
        lock(&self.requests)
            .iter()
            .map(|(_, tools)| tools.iter().map(|t| t.name.clone()).collect())
            .collect()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CompletionAdapter for ScriptedAdapter {
    async fn open(&self, history: Vec<HistoryMessage>, tools: Vec<ToolSpec>) -> Result<EventStream> {
        lock(&self.requests).push((history, tools));

        let steps = match lock(&self.turns).pop_front() {
            Some(Turn::Stream(steps)) => steps,
            Some(Turn::Refuse(message)) => return Err(MurmurError::adapter(message)),
            None => return Err(MurmurError::adapter("No scripted turn left")),
        };

        let events = stream::unfold(VecDeque::from(steps), |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    ScriptStep::Event(event) => return Some((Ok(event), steps)),
                    ScriptStep::Fail(message) => {
                        steps.clear();
                        return Some((Err(MurmurError::adapter(message)), steps));
                    }
                    ScriptStep::Delay(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        });

        Ok(Box::new(events.boxed()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
