//! Message and Part domain types.
//!
//! These are the value objects that flow through the entire system:
//! the client sends its transcript as messages → the orchestrator appends an
//! assistant message whose parts grow while it streams → the reconciler
//! rebuilds the same shape on the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

fn new_part_id() -> String {
    format!("txt_{}", Uuid::new_v4().simple())
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant (text and tool invocations)
    Assistant,
    /// System instructions
    System,
}

/// Lifecycle of a single tool invocation.
///
/// States only move forward:
/// `input-streaming → input-available → executing → output-available | output-error`.
/// Skipping a state is allowed, going back is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    Executing,
    OutputAvailable,
    OutputError,
}

impl ToolState {
    fn rank(self) -> u8 {
        match self {
            Self::InputStreaming => 0,
            Self::InputAvailable => 1,
            Self::Executing => 2,
            Self::OutputAvailable | Self::OutputError => 3,
        }
    }

    /// Whether the call has produced its final outcome.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::OutputAvailable | Self::OutputError)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: ToolState) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputStreaming => "input-streaming",
            Self::InputAvailable => "input-available",
            Self::Executing => "executing",
            Self::OutputAvailable => "output-available",
            Self::OutputError => "output-error",
        }
    }
}

impl fmt::Display for ToolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted to move a tool invocation backwards (or sideways) in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool call {call_id} cannot move from {from} to {to}")]
pub struct StateRegression {
    pub call_id: String,
    pub from: ToolState,
    pub to: ToolState,
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Name of the tool being invoked
    pub tool_name: String,

    /// Unique (per message) call ID, stable across all lifecycle events
    pub call_id: String,

    /// Current lifecycle state
    pub state: ToolState,

    /// Arguments. While streaming this is the raw argument text received so
    /// far; once `input-available` it is the parsed JSON input.
    #[serde(default)]
    pub input: serde_json::Value,

    /// The success envelope, once `output-available`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// The failure reason, once `output-error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ToolInvocation {
    /// Start a new invocation whose arguments are still streaming.
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            call_id: call_id.into(),
            state: ToolState::InputStreaming,
            input: serde_json::Value::Null,
            output: None,
            error_text: None,
        }
    }

    /// Move to `next`, rejecting any transition that is not strictly forward.
    pub fn advance(&mut self, next: ToolState) -> Result<(), StateRegression> {
        if !self.state.can_advance_to(next) {
            return Err(StateRegression {
                call_id: self.call_id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Append a fragment of streamed argument text.
    pub fn push_input_text(&mut self, delta: &str) {
        match &mut self.input {
            serde_json::Value::String(text) => text.push_str(delta),
            other => *other = serde_json::Value::String(delta.to_string()),
        }
    }

    /// Record the complete input and mark it available.
    pub fn set_input(&mut self, input: serde_json::Value) -> Result<(), StateRegression> {
        self.advance(ToolState::InputAvailable)?;
        self.input = input;
        Ok(())
    }

    /// Record a successful output.
    pub fn set_output(&mut self, output: serde_json::Value) -> Result<(), StateRegression> {
        self.advance(ToolState::OutputAvailable)?;
        self.output = Some(output);
        Ok(())
    }

    /// Record a terminal failure.
    pub fn set_error(&mut self, error: impl Into<String>) -> Result<(), StateRegression> {
        self.advance(ToolState::OutputError)?;
        self.error_text = Some(error.into());
        Ok(())
    }
}

/// An ordered, typed fragment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    /// Free-form text, accumulated from deltas.
    Text {
        #[serde(default = "new_part_id")]
        id: String,
        text: String,
    },

    /// A call to a registered tool.
    #[serde(rename = "tool-invocation")]
    ToolInvocation(ToolInvocation),
}

impl Part {
    /// Create a text part.
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            id: id.into(),
            text: text.into(),
        }
    }

    /// The part identifier: the text block id or the tool call id.
    pub fn id(&self) -> &str {
        match self {
            Self::Text { id, .. } => id,
            Self::ToolInvocation(call) => &call.call_id,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::ToolInvocation(_) => None,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolInvocation> {
        match self {
            Self::ToolInvocation(call) => Some(call),
            Self::Text { .. } => None,
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (generated when a client omits it)
    #[serde(default = "new_message_id")]
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Ordered parts; append-only while the message is streaming
    #[serde(default)]
    pub parts: Vec<Part>,

    /// Creation time
    #[serde(default = "Utc::now", rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create an empty message with the given id and role.
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a new user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        let mut msg = Self::new(new_message_id(), Role::User);
        msg.parts.push(Part::text(new_part_id(), text));
        msg
    }

    /// Create a new system message with a single text part.
    pub fn system(text: impl Into<String>) -> Self {
        let mut msg = Self::new(new_message_id(), Role::System);
        msg.parts.push(Part::text(new_part_id(), text));
        msg
    }

    /// Create a new, empty assistant message.
    pub fn assistant() -> Self {
        Self::new(new_message_id(), Role::Assistant)
    }

    /// All text parts joined in order.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    /// Tool invocations in part order.
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(Part::as_tool)
    }

    pub fn part(&self, id: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.id() == id)
    }

    pub fn part_mut(&mut self, id: &str) -> Option<&mut Part> {
        self.parts.iter_mut().find(|p| p.id() == id)
    }

    pub fn tool_invocation_mut(&mut self, call_id: &str) -> Option<&mut ToolInvocation> {
        self.parts.iter_mut().find_map(|p| match p {
            Part::ToolInvocation(call) if call.call_id == call_id => Some(call),
            _ => None,
        })
    }
}
