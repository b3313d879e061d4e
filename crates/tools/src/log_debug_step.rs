//! Debug step recorder.
//!
//! The model calls this to write down each step of the debugging process it
//! walks the user through. The step is echoed back so the client can show it.

use async_trait::async_trait;
use duckling_core::error::ToolError;
use duckling_core::schema::{parse_input, schema_for};
use duckling_core::tool::{Envelope, Tool};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub struct LogDebugStepTool;

#[derive(Serialize, Deserialize, JsonSchema)]
struct DebugStep {
    #[schemars(description = "The debugging step being performed")]
    step: String,
    #[schemars(description = "What was found or learned in this step")]
    finding: String,
}

#[async_trait]
impl Tool for LogDebugStepTool {
    fn name(&self) -> &str {
        "log_debug_step"
    }

    fn description(&self) -> &str {
        "Log a step in the debugging process"
    }

    fn parameters(&self) -> Value {
        schema_for::<DebugStep>()
    }

    async fn execute(&self, input: Value) -> Result<Envelope, ToolError> {
        let step: DebugStep = parse_input(input)?;
        tracing::info!(step = %step.step, finding = %step.finding, "Debug step logged");

        Envelope::from_data(&step).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })
    }
}
