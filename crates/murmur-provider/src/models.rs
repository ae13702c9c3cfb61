use murmur_core::provider::{HistoryMessage, ToolSpec};
use murmur_core::ToolCall;
use serde::{Deserialize, Serialize};

/// OpenAI Chat Completions API request
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ChatTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ChatFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Streaming response chunk
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<ChatChoiceDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoiceDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChatMessageDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessageDelta {
    pub role: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallChunk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallChunk {
    pub index: usize,
    pub id: Option<String>,
    pub function: Option<FunctionChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionChunk {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// OpenAI API Error Response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIError {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl From<HistoryMessage> for ChatMessage {
    fn from(msg: HistoryMessage) -> Self {
        // Tool-calling turns may carry no text; the API expects null there.
        let content = if msg.content.is_empty() && !msg.tool_calls.is_empty() {
            None
        } else {
            Some(msg.content)
        };
        Self {
            role: msg.role.as_str().to_string(),
            content,
            tool_calls: msg.tool_calls,
            tool_call_id: msg.tool_call_id,
        }
    }
}

impl From<ToolSpec> for ChatTool {
    fn from(spec: ToolSpec) -> Self {
        Self {
            kind: "function",
            function: ChatFunction {
                name: spec.name,
                description: spec.description,
                parameters: spec.parameters,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::Role;
    use serde_json::json;

    #[test]
    fn test_request_with_tools() {
        let request = ChatCompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![HistoryMessage {
                role: Role::User,
                content: "weather?".to_string(),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }
            .into()],
            temperature: Some(0.7),
            stream: true,
            tools: vec![ToolSpec {
                name: "get_weather".to_string(),
                description: "Gets the weather for a location".to_string(),
                parameters: json!({"type": "object"}),
            }
            .into()],
            tool_choice: Some("auto".to_string()),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["tool_choice"], "auto");
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(value["messages"][0]["role"], "user");
        assert!(value["messages"][0].get("tool_calls").is_none());
    }

    #[test]
    fn test_tool_turn_has_null_content() {
        let message: ChatMessage = HistoryMessage {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: vec![ToolCall::function("call_1", "get_weather", "{}")],
            tool_call_id: None,
        }
        .into();
        let value = serde_json::to_value(&message).unwrap();
        assert!(value["content"].is_null());
        assert_eq!(value["tool_calls"][0]["id"], "call_1");
    }

    #[test]
    fn test_chunk_with_tool_call_delta() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4",
               "choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function",
               "function":{"name":"get_weather","arguments":"{\"lo"}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        let call = &chunk.choices[0].delta.tool_calls[0];
        assert_eq!(call.index, 0);
        assert_eq!(call.id.as_deref(), Some("call_1"));
        let function = call.function.as_ref().unwrap();
        assert_eq!(function.name.as_deref(), Some("get_weather"));
        assert_eq!(function.arguments.as_deref(), Some("{\"lo"));
    }
}
