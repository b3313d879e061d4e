//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of deltas. The
//! orchestrator only ever streams; `complete` is the minimal contract a
//! backend (or a test double) must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, Part, Role, ToolInvocation, ToolState};

/// Role of a provider-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    System,
    User,
    Assistant,
    /// Tool execution result
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

/// A message in the flat shape chat-completion APIs expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: ModelRole,

    /// The text content
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ModelToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ModelMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ModelRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ModelRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ModelRole::Assistant, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ModelRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: ModelRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Flatten a part-based transcript into provider messages.
    ///
    /// An assistant message is split at every point where text follows
    /// resolved tool calls, so each segment becomes
    /// `assistant(text + tool_calls)` followed by one `tool` message per call.
    /// Tool invocations without an outcome are omitted: providers reject a
    /// call that has no matching result.
    pub fn from_history(messages: &[Message]) -> Vec<ModelMessage> {
        let mut out = Vec::new();
        for message in messages {
            match message.role {
                Role::System => out.push(Self::system(message.text())),
                Role::User => out.push(Self::user(message.text())),
                Role::Assistant => flatten_assistant(message, &mut out),
            }
        }
        out
    }
}

fn flatten_assistant(message: &Message, out: &mut Vec<ModelMessage>) {
    let mut text = String::new();
    let mut calls: Vec<&ToolInvocation> = Vec::new();

    for part in &message.parts {
        match part {
            Part::Text { text: delta, .. } => {
                if !calls.is_empty() {
                    flush_segment(&mut text, &mut calls, out);
                }
                text.push_str(delta);
            }
            Part::ToolInvocation(call) if call.state.is_terminal() => calls.push(call),
            Part::ToolInvocation(_) => {}
        }
    }
    flush_segment(&mut text, &mut calls, out);
}

fn flush_segment(text: &mut String, calls: &mut Vec<&ToolInvocation>, out: &mut Vec<ModelMessage>) {
    if text.is_empty() && calls.is_empty() {
        return;
    }
    let mut assistant = ModelMessage::assistant(std::mem::take(text));
    assistant.tool_calls = calls
        .iter()
        .map(|call| ModelToolCall {
            id: call.call_id.clone(),
            name: call.tool_name.clone(),
            arguments: call.input.to_string(),
        })
        .collect();
    out.push(assistant);

    for call in calls.drain(..) {
        out.push(ModelMessage::tool_result(&call.call_id, tool_result_content(call)));
    }
}

fn tool_result_content(call: &ToolInvocation) -> String {
    match (call.state, &call.output, &call.error_text) {
        (ToolState::OutputAvailable, Some(output), _) => output.to_string(),
        (_, _, Some(error)) => serde_json::json!({ "success": false, "error": error }).to_string(),
        _ => serde_json::json!({ "success": false, "error": "no result" }).to_string(),
    }
}

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gemini-2.5-flash")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<ModelMessage>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Natural-language hint for when to invoke the tool
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated assistant message
    pub message: ModelMessage,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Add another usage report to this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// An incremental fragment of a tool call's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Call ID (stable across all deltas of one call)
    pub id: String,

    /// Tool name (known from the first delta)
    pub name: String,

    /// Next fragment of the JSON argument string
    #[serde(default)]
    pub arguments_delta: String,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Partial tool call deltas, in emission order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_deltas: Vec<ToolCallDelta>,

    /// Complete tool calls (only in the final chunk), in emission order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ModelToolCall>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The orchestrator calls
/// `stream()` without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let content = Some(response.message.content).filter(|c| !c.is_empty());
        let _ = tx
            .send(Ok(StreamChunk {
                content,
                tool_call_deltas: Vec::new(),
                tool_calls: response.message.tool_calls,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}
