//! Weather lookup tool: simulated current temperature for a location.
//!
//! Temperatures are drawn at random from a mild range on every call, so two
//! lookups for the same place may disagree.

use async_trait::async_trait;
use duckling_core::error::ToolError;
use duckling_core::schema::{parse_input, schema_for};
use duckling_core::tool::{Envelope, Tool};
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::RangeInclusive;

/// Simulated temperature range in °F.
pub const TEMPERATURE_RANGE: RangeInclusive<i64> = 62..=82;

pub struct WeatherLookupTool;

#[derive(Deserialize, JsonSchema)]
struct WeatherInput {
    #[schemars(description = "The location to get the weather for")]
    location: String,
}

#[derive(Serialize)]
struct WeatherData {
    location: String,
    temperature: i64,
}

#[async_trait]
impl Tool for WeatherLookupTool {
    fn name(&self) -> &str {
        "weather_lookup"
    }

    fn description(&self) -> &str {
        "Get the current weather in a location"
    }

    fn parameters(&self) -> Value {
        schema_for::<WeatherInput>()
    }

    async fn execute(&self, input: Value) -> Result<Envelope, ToolError> {
        let WeatherInput { location } = parse_input(input)?;
        let temperature = rand::rng().random_range(TEMPERATURE_RANGE);
        tracing::debug!(%location, temperature, "Simulated weather lookup");

        Envelope::from_data(&WeatherData {
            location,
            temperature,
        })
        .map_err(failed)
    }
}

fn failed(e: serde_json::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "weather_lookup".into(),
        reason: e.to_string(),
    }
}
