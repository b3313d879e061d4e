//! Built-in tool implementations for Duckling.
//!
//! - `log_debug_step`: records a step of the debugging walk-through
//! - `weather_lookup`: simulated current temperature for a location
//! - `github_issue`: fetches an issue from the GitHub REST API

pub mod github_issue;
pub mod log_debug_step;
pub mod weather_lookup;

use duckling_config::AppConfig;
use duckling_core::error::ToolError;
use duckling_core::tool::{Tool, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;

pub use github_issue::GithubIssueTool;
pub use log_debug_step::LogDebugStepTool;
pub use weather_lookup::WeatherLookupTool;

/// Build the tool named `name`, if it is one of ours.
pub fn build_tool(name: &str, config: &AppConfig) -> Option<Arc<dyn Tool>> {
    let tool: Arc<dyn Tool> = match name {
        "log_debug_step" => Arc::new(LogDebugStepTool),
        "weather_lookup" => Arc::new(WeatherLookupTool),
        "github_issue" => Arc::new(GithubIssueTool::new(
            &config.github.api_url,
            config.github.token.clone(),
        )),
        _ => return None,
    };
    Some(tool)
}

/// Create the registry of tools enabled in `config`.
pub fn default_registry(config: &AppConfig) -> Result<ToolRegistry, ToolError> {
    let mut registry =
        ToolRegistry::new().with_timeout(Duration::from_secs(config.tool_timeout_secs));

    for name in &config.tools.enabled {
        let tool = build_tool(name, config).ok_or_else(|| ToolError::NotFound(name.clone()))?;
        registry.register(tool)?;
    }

    tracing::debug!(tools = ?registry.names(), "Tool registry ready");
    Ok(registry)
}
