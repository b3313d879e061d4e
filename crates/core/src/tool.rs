//! Tool trait and registry.
//!
//! A tool is a named capability with a JSON Schema for its input. The
//! registry owns every tool, validates raw model input against that schema and
//! turns every executor outcome into a uniform [`Envelope`].

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use crate::schema::validate_against_schema;

/// Uniform result wrapper returned by every dispatch.
///
/// On the wire this is `{"success": true, ...domain fields}` or
/// `{"success": false, "error": "<non-empty>"}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success(Map<String, Value>),
    Failure(String),
}

impl Envelope {
    /// Wrap the fields of a serializable value as a success envelope.
    ///
    /// Non-object values are stored under a `result` key.
    pub fn from_data<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::to_value(data)? {
            Value::Object(mut fields) => {
                fields.remove("success");
                Self::Success(fields)
            }
            other => {
                let mut fields = Map::new();
                fields.insert("result".into(), other);
                Self::Success(fields)
            }
        })
    }

    /// A failure envelope. An empty reason is replaced with a generic one.
    pub fn failure(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if reason.trim().is_empty() {
            Self::Failure("tool failed without a reason".into())
        } else {
            Self::Failure(reason)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure(reason) => Some(reason),
            Self::Success(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Success(fields) => {
                let mut object = Map::with_capacity(fields.len() + 1);
                object.insert("success".into(), Value::Bool(true));
                object.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                Value::Object(object)
            }
            Self::Failure(reason) => serde_json::json!({ "success": false, "error": reason }),
        }
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let mut object = Map::deserialize(deserializer)?;
        match object.remove("success") {
            Some(Value::Bool(true)) => Ok(Self::Success(object)),
            Some(Value::Bool(false)) => match object.remove("error") {
                Some(Value::String(reason)) if !reason.is_empty() => Ok(Self::Failure(reason)),
                _ => Err(D::Error::custom("failure envelope needs a non-empty error")),
            },
            _ => Err(D::Error::custom("envelope needs a boolean success field")),
        }
    }
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in the [`ToolRegistry`].
/// Executors only ever see input that passed [`Tool::validate`]. Tools with a
/// fixed input type generate their schema with [`crate::schema::schema_for`]
/// and read it back with [`crate::schema::parse_input`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "weather_lookup").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema of the input (sent to the LLM).
    fn parameters(&self) -> Value;

    /// Check raw model input against [`Tool::parameters`].
    fn validate(&self, raw: &Value) -> Result<(), ToolError> {
        Ok(validate_against_schema(&self.parameters(), raw)?)
    }

    /// Execute the tool with validated input.
    async fn execute(&self, input: Value) -> Result<Envelope, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// A registry of available tools.
///
/// Read-only once built; shared between concurrent tool tasks behind an `Arc`.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every executor call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate and execute a tool call.
    ///
    /// Only an unknown name is an `Err`. Validation failures, executor errors
    /// and timeouts all come back as [`Envelope::Failure`].
    pub async fn dispatch(&self, name: &str, raw_input: &Value) -> Result<Envelope, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if let Err(e) = tool.validate(raw_input) {
            tracing::debug!(tool = name, error = %e, "Rejected tool input");
            return Ok(Envelope::failure(e.to_string()));
        }
        let input = raw_input.clone();

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(input)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolError::Timeout {
                    tool_name: name.to_string(),
                    timeout_secs: limit.as_secs(),
                }),
            },
            None => tool.execute(input).await,
        };

        Ok(outcome.unwrap_or_else(|e| {
            tracing::warn!(tool = name, error = %e, "Tool execution failed");
            Envelope::failure(e.to_string())
        }))
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("timeout", &self.timeout)
            .finish()
    }
}
