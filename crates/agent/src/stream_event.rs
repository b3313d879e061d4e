//! Orchestrator-level streaming events.
//!
//! `OrchestratorEvent` is what the turn loop produces while it runs. The
//! multiplexer turns these into sequenced wire frames.

use duckling_core::frame::FinishReason;
use duckling_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted by the orchestrator during one turn.
///
/// Every run ends with exactly one `finish` or `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// The assistant message for this turn was opened.
    MessageStart { message_id: String },

    StepStart { step: u32 },

    TextStart { part_id: String },
    TextDelta { part_id: String, delta: String },
    TextEnd { part_id: String },

    /// The model started a tool call; arguments may follow as deltas.
    ToolInputStart { call_id: String, tool_name: String },
    ToolInputDelta { call_id: String, delta: String },
    ToolInputAvailable {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    /// The call was handed to the registry.
    ToolExecuting { call_id: String },
    ToolOutputAvailable {
        call_id: String,
        output: serde_json::Value,
    },
    ToolOutputError { call_id: String, error_text: String },

    /// Every tool call of `step` has an outcome.
    ToolResultsReady { step: u32, count: usize },

    StepFinish { step: u32 },

    /// The turn ended normally or ran out of steps.
    Finish {
        reason: FinishReason,
        steps: u32,
        tool_calls_made: usize,
        usage: Option<Usage>,
    },

    /// The provider failed; the turn is over.
    Error { message: String },
}

impl OrchestratorEvent {
    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }

    /// Event name, used in logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::StepStart { .. } => "step_start",
            Self::TextStart { .. } => "text_start",
            Self::TextDelta { .. } => "text_delta",
            Self::TextEnd { .. } => "text_end",
            Self::ToolInputStart { .. } => "tool_input_start",
            Self::ToolInputDelta { .. } => "tool_input_delta",
            Self::ToolInputAvailable { .. } => "tool_input_available",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolOutputAvailable { .. } => "tool_output_available",
            Self::ToolOutputError { .. } => "tool_output_error",
            Self::ToolResultsReady { .. } => "tool_results_ready",
            Self::StepFinish { .. } => "step_finish",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }
}
