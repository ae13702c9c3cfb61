use crate::transcript::{Message, Role, ToolCall};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message as offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl From<&Message> for HistoryMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls: message.tool_calls.clone(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

/// Declaration of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the accepted named arguments.
    pub parameters: serde_json::Value,
}

/// One fragment of a streamed tool call. Fragments sharing an `index` belong
/// to the same call; `arguments` must be concatenated in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ContentDelta(String),
    ToolCallDelta(ToolCallDelta),
    Done,
}

/// Finite, forward-only sequence of stream events. An `Err` item is terminal.
pub type EventStream = Box<dyn futures::Stream<Item = Result<StreamEvent>> + Unpin + Send>;

#[async_trait]
pub trait CompletionAdapter: Send + Sync {
    /// Open a streaming completion for `history`, offering `tools` with automatic selection.
    async fn open(&self, history: Vec<HistoryMessage>, tools: Vec<ToolSpec>) -> Result<EventStream>;

    fn name(&self) -> &str;
}
