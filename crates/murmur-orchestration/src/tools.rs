use murmur_core::provider::ToolSpec;
use murmur_core::{MurmurError, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A synchronous tool the model can call.
#[cfg_attr(test, mockall::automock)]
pub trait ToolHandler: Send + Sync {
    fn call(&self, args: Value) -> anyhow::Result<Value>;
}

impl<F> ToolHandler for F
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, args: Value) -> anyhow::Result<Value> {
        self(args)
    }
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Maps tool names to handlers and the declarations offered to the model.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(weather_spec(), get_weather);
        registry
    }

    /// Register a tool. A later registration under the same name replaces the earlier one.
    pub fn register(&mut self, spec: ToolSpec, handler: impl ToolHandler + 'static) {
        let handler: Arc<dyn ToolHandler> = Arc::new(handler);
        match self.tools.iter_mut().find(|t| t.spec.name == spec.name) {
            Some(existing) => {
                warn!(tool = %spec.name, "Replacing registered tool");
                existing.spec = spec;
                existing.handler = handler;
            }
            None => {
                debug!(tool = %spec.name, "Registered tool");
                self.tools.push(RegisteredTool { spec, handler });
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.spec.name == name)
    }

    /// Declarations in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool with its raw JSON argument string.
    ///
    /// An empty argument string is treated as `{}`. A string result is returned
    /// as-is, anything else as compact JSON.
    #[instrument(skip(self, args_json), fields(args_len = args_json.len()))]
    pub fn invoke(&self, name: &str, args_json: &str) -> Result<String> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.spec.name == name)
            .ok_or_else(|| MurmurError::UnknownTool {
                name: name.to_string(),
            })?;

        let args = if args_json.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(args_json).map_err(|e| MurmurError::ToolFailure {
                name: name.to_string(),
                reason: format!("Invalid arguments: {}", e),
            })?
        };

        let output = tool.handler.call(args).map_err(|e| MurmurError::ToolFailure {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        info!(tool = %name, "Tool invoked");
        Ok(match output {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }
}

fn weather_spec() -> ToolSpec {
    ToolSpec {
        name: "get_weather".to_string(),
        description: "Gets the weather for a location".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City or region to look up"
                }
            },
            "required": ["location"]
        }),
    }
}

fn get_weather(args: Value) -> anyhow::Result<Value> {
    let location = args
        .get("location")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing required argument: location"))?;
    debug!(location, "Looking up weather");
    Ok(Value::String("Tornado watch!".to_string()))
}
