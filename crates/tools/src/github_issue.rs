//! GitHub issue lookup: fetch the title, body and state of an issue.
//!
//! Calls the REST API (`GET /repos/{owner}/{repo}/issues/{number}`). A token
//! is optional; without one only public repositories resolve.

use async_trait::async_trait;
use duckling_core::error::ToolError;
use duckling_core::schema::{parse_input, schema_for};
use duckling_core::tool::{Envelope, Tool};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub struct GithubIssueTool {
    api_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl GithubIssueTool {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("duckling/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            client,
        }
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: reason.into(),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct IssueInput {
    #[schemars(description = "Repository owner (user or organization)")]
    owner: String,
    #[schemars(description = "Repository name")]
    repo: String,
    #[schemars(description = "Issue number")]
    issue_number: u64,
}

/// The slice of the GitHub issue payload the assistant needs.
#[derive(Serialize, Deserialize)]
struct Issue {
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
}

#[async_trait]
impl Tool for GithubIssueTool {
    fn name(&self) -> &str {
        "github_issue"
    }

    fn description(&self) -> &str {
        "Fetch a GitHub issue (title, body and state) to see what the user is debugging"
    }

    fn parameters(&self) -> Value {
        schema_for::<IssueInput>()
    }

    async fn execute(&self, input: Value) -> Result<Envelope, ToolError> {
        let input: IssueInput = parse_input(input)?;
        let url = format!(
            "{}/repos/{}/{}/issues/{}",
            self.api_url, input.owner, input.repo, input.issue_number
        );
        tracing::debug!(%url, "Fetching GitHub issue");

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.failed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failed(format!(
                "GitHub API returned {} for {}/{}#{}",
                status.as_u16(),
                input.owner,
                input.repo,
                input.issue_number
            )));
        }

        let issue: Issue = response
            .json()
            .await
            .map_err(|e| self.failed(format!("unexpected response: {e}")))?;

        Envelope::from_data(&issue).map_err(|e| self.failed(e.to_string()))
    }
}
