//! Wire frames.
//!
//! Every event the server streams is a [`Frame`]: a global sequence number,
//! the message and part it belongs to, a per-part sequence number and the
//! event payload. Frames for one part arrive in the order they were produced;
//! frames for different parts may interleave.

use serde::{Deserialize, Serialize};

use crate::message::Role;
use crate::provider::Usage;

/// Why a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FinishReason {
    /// The model answered without requesting tools.
    Stop,
    /// The step budget ran out right after a tool step.
    StepBudgetExhausted,
    /// The provider or stream failed.
    Error { message: String },
}

impl FinishReason {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Payload of a frame, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum FrameEvent {
    MessageStart { role: Role },
    StepStart { step: u32 },
    StepFinish { step: u32 },
    ToolResultsReady { step: u32, count: usize },

    TextStart,
    TextDelta { delta: String },
    TextEnd,

    ToolInputStart { tool_name: String },
    ToolInputDelta { delta: String },
    ToolInputAvailable { tool_name: String, input: serde_json::Value },
    ToolExecuting,
    ToolOutputAvailable { output: serde_json::Value },
    ToolOutputError { error_text: String },

    Finish {
        reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl FrameEvent {
    /// The SSE event name for this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message-start",
            Self::StepStart { .. } => "step-start",
            Self::StepFinish { .. } => "step-finish",
            Self::ToolResultsReady { .. } => "tool-results-ready",
            Self::TextStart => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd => "text-end",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputDelta { .. } => "tool-input-delta",
            Self::ToolInputAvailable { .. } => "tool-input-available",
            Self::ToolExecuting => "tool-executing",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
            Self::ToolOutputError { .. } => "tool-output-error",
            Self::Finish { .. } => "finish",
        }
    }
}

/// One multiplexed wire event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Global, strictly increasing sequence number
    pub seq: u64,

    pub message_id: String,

    /// Text block id, tool call id, or the message id for message-scoped events
    pub part_id: String,

    /// Strictly increasing per `part_id`, starting at 1
    pub part_seq: u64,

    pub event: FrameEvent,
}

impl Frame {
    /// Whether this is the stream's terminal frame.
    pub fn is_terminal(&self) -> bool {
        matches!(self.event, FrameEvent::Finish { .. })
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        match &self.event {
            FrameEvent::Finish { reason, .. } => Some(reason),
            _ => None,
        }
    }
}
