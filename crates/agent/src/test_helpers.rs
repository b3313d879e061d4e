//! Shared test helpers for orchestrator and multiplexer tests.

use duckling_core::error::ProviderError;
use duckling_core::provider::{
    ModelMessage, ModelToolCall, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One scripted provider turn.
pub enum Script {
    /// Returned through `complete`; `stream` wraps it as a single chunk.
    Response(ProviderResponse),
    /// Sent chunk by chunk from `stream`.
    Chunks(Vec<StreamChunk>),
    /// The request fails.
    Fail(ProviderError),
}

impl Script {
    pub fn text(text: &str) -> Self {
        Self::Response(make_response(ModelMessage::assistant(text)))
    }

    /// A response requesting `(id, name, arguments)` tool calls.
    pub fn tool_calls(calls: Vec<(&str, &str, &str)>) -> Self {
        let mut message = ModelMessage::assistant("");
        message.tool_calls = calls
            .into_iter()
            .map(|(id, name, arguments)| ModelToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            })
            .collect();
        Self::Response(make_response(message))
    }
}

fn make_response(message: ModelMessage) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A mock provider that plays back a sequence of scripted turns.
///
/// Panics if more calls are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(mut scripts: Vec<Script>) -> Self {
        scripts.reverse();
        Self {
            scripts: Mutex::new(scripts),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: ProviderRequest) -> Script {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        self.scripts.lock().unwrap().pop().unwrap_or_else(|| {
            panic!("ScriptedProvider: no more scripts (call #{})", requests.len())
        })
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next(request) {
            Script::Response(response) => Ok(response),
            Script::Fail(e) => Err(e),
            Script::Chunks(_) => panic!("ScriptedProvider: chunk script used with complete()"),
        }
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let chunks = match self.next(request) {
            Script::Fail(e) => return Err(e),
            Script::Chunks(chunks) => chunks,
            Script::Response(response) => vec![StreamChunk {
                content: Some(response.message.content).filter(|c| !c.is_empty()),
                tool_calls: response.message.tool_calls,
                done: true,
                usage: response.usage,
                ..StreamChunk::default()
            }],
        };
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(Ok(chunk)).await.unwrap();
        }
        Ok(rx)
    }
}

/// Drain a receiver into a Vec.
pub async fn collect<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item);
    }
    items
}
