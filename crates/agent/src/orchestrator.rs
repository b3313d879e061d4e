//! The turn orchestrator: a bounded generate → call tools → generate loop.
//!
//! One call to [`TurnOrchestrator::run`] handles one client request. The loop
//! runs in a spawned task and reports everything it does as
//! [`OrchestratorEvent`]s:
//!
//! 1. Send the history (system prompt first) and tool definitions to the provider
//! 2. Stream text deltas and tool-call requests into the open assistant message
//! 3. **No tool calls**: finish with `stop`
//! 4. **Tool calls**: dispatch all of them concurrently, wait for every
//!    outcome, record the results and go back to 1
//!
//! The loop never runs more than `max_steps` steps. Dropping the receiver
//! cancels the turn: no further provider requests or dispatches are made.

use chrono::Utc;
use duckling_config::AppConfig;
use duckling_core::event::{DomainEvent, EventBus};
use duckling_core::frame::FinishReason;
use duckling_core::message::{Message, Part, ToolInvocation, ToolState};
use duckling_core::provider::{ModelMessage, Provider, ProviderRequest, Usage};
use duckling_core::tool::{Envelope, ToolRegistry};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::stream_event::OrchestratorEvent;

/// Everything a turn needs. No process-wide state is consulted.
#[derive(Clone)]
pub struct OrchestratorConfig {
    pub provider: Arc<dyn Provider>,
    pub tools: Arc<ToolRegistry>,
    pub max_steps: u32,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

impl OrchestratorConfig {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
        max_steps: u32,
    ) -> Self {
        Self {
            provider,
            tools,
            max_steps: max_steps.max(1),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: None,
        }
    }

    /// Build from application config; the step budget follows the tool count.
    pub fn from_app_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        let max_steps = config.step_budget(tools.len());
        Self::new(provider, tools, model, max_steps)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_system_prompt(config.system_prompt.clone())
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }
}

impl std::fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("provider", &self.provider.name())
            .field("tools", &self.tools.names())
            .field("max_steps", &self.max_steps)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

/// Runs turns against one configuration.
pub struct TurnOrchestrator {
    config: OrchestratorConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl TurnOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            event_bus: None,
        }
    }

    /// Publish domain events on `bus` while running.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a turn over `history` and return its event stream.
    ///
    /// The stream always ends with a `finish` or `error` event unless the
    /// receiver is dropped first.
    pub fn run(&self, history: Vec<Message>) -> mpsc::Receiver<OrchestratorEvent> {
        let (tx, rx) = mpsc::channel(128);
        let turn = Turn {
            config: self.config.clone(),
            event_bus: self.event_bus.clone(),
            tx,
            history,
            assistant: Message::assistant(),
            started: false,
            usage: None,
            tool_calls_made: 0,
        };
        tokio::spawn(turn.drive());
        rx
    }
}

/// The receiver was dropped.
struct Cancelled;

enum StepOutcome {
    Answered,
    ToolsRan,
    Failed,
}

/// A tool call collected during one step.
struct PendingCall {
    call_id: String,
    tool_name: String,
    raw_args: String,
    input: Value,
}

struct Turn {
    config: OrchestratorConfig,
    event_bus: Option<Arc<EventBus>>,
    tx: mpsc::Sender<OrchestratorEvent>,
    history: Vec<Message>,
    assistant: Message,
    started: bool,
    usage: Option<Usage>,
    tool_calls_made: usize,
}

impl Turn {
    async fn drive(mut self) {
        let mut step = 0u32;
        loop {
            if self.tx.is_closed() {
                debug!(message_id = %self.assistant.id, "Client went away, stopping turn");
                return;
            }
            step += 1;

            let outcome = match self.run_step(step).await {
                Ok(outcome) => outcome,
                Err(Cancelled) => {
                    debug!(message_id = %self.assistant.id, step, "Turn cancelled mid-step");
                    return;
                }
            };

            match outcome {
                StepOutcome::Failed => return,
                StepOutcome::Answered => {
                    self.finish(FinishReason::Stop, step).await;
                    return;
                }
                StepOutcome::ToolsRan if step >= self.config.max_steps => {
                    info!(
                        message_id = %self.assistant.id,
                        max_steps = self.config.max_steps,
                        "Step budget exhausted"
                    );
                    self.finish(FinishReason::StepBudgetExhausted, step).await;
                    return;
                }
                StepOutcome::ToolsRan => {}
            }
        }
    }

    async fn run_step(&mut self, step: u32) -> Result<StepOutcome, Cancelled> {
        let mut stream = match self.config.provider.stream(self.request()).await {
            Ok(rx) => rx,
            Err(e) => {
                self.fail(format!("Provider error: {e}")).await;
                return Ok(StepOutcome::Failed);
            }
        };

        if !self.started {
            self.started = true;
            self.emit(OrchestratorEvent::MessageStart {
                message_id: self.assistant.id.clone(),
            })
            .await?;
        }
        self.emit(OrchestratorEvent::StepStart { step }).await?;
        debug!(message_id = %self.assistant.id, step, "Step started");

        let mut open_text: Option<String> = None;
        let mut pending: Vec<PendingCall> = Vec::new();
        let mut by_provider_id: HashMap<String, usize> = HashMap::new();
        let mut completed = Vec::new();

        while let Some(chunk) = stream.recv().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.close_text(&mut open_text).await?;
                    self.fail(format!("Stream error: {e}")).await;
                    return Ok(StepOutcome::Failed);
                }
            };

            if let Some(usage) = &chunk.usage {
                self.usage.get_or_insert_with(Usage::default).accumulate(usage);
            }

            if let Some(delta) = chunk.content.filter(|c| !c.is_empty()) {
                self.push_text(&mut open_text, delta).await?;
            }

            for delta in chunk.tool_call_deltas {
                self.close_text(&mut open_text).await?;
                let index = match by_provider_id.get(&delta.id) {
                    Some(&index) => index,
                    None => {
                        let index = self.start_call(&mut pending, &delta.id, &delta.name).await?;
                        by_provider_id.insert(delta.id.clone(), index);
                        index
                    }
                };
                if delta.arguments_delta.is_empty() {
                    continue;
                }
                let call = &mut pending[index];
                call.raw_args.push_str(&delta.arguments_delta);
                let call_id = call.call_id.clone();
                if let Some(part) = self.assistant.tool_invocation_mut(&call_id) {
                    part.push_input_text(&delta.arguments_delta);
                }
                self.emit(OrchestratorEvent::ToolInputDelta {
                    call_id,
                    delta: delta.arguments_delta,
                })
                .await?;
            }

            if chunk.done {
                completed = chunk.tool_calls;
                break;
            }
        }
        self.close_text(&mut open_text).await?;

        // The final tool call list is authoritative over streamed fragments.
        let mut claimed = HashSet::new();
        for call in completed {
            let index = match by_provider_id.get(&call.id) {
                Some(&index) if claimed.insert(index) => index,
                _ => {
                    let index = self.start_call(&mut pending, &call.id, &call.name).await?;
                    claimed.insert(index);
                    index
                }
            };
            let entry = &mut pending[index];
            entry.raw_args = call.arguments;
            if entry.tool_name.is_empty() {
                entry.tool_name = call.name;
            }
        }

        for call in &mut pending {
            call.input = parse_arguments(&call.raw_args);
            if let Some(part) = self.assistant.tool_invocation_mut(&call.call_id) {
                part.tool_name = call.tool_name.clone();
                if let Err(e) = part.set_input(call.input.clone()) {
                    warn!(error = %e, "Tool input arrived out of order");
                }
            }
        }
        for call in &pending {
            self.emit(OrchestratorEvent::ToolInputAvailable {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                input: call.input.clone(),
            })
            .await?;
        }

        let tool_calls = pending.len();
        let outcome = if pending.is_empty() {
            StepOutcome::Answered
        } else {
            self.execute_tools(step, pending).await?;
            StepOutcome::ToolsRan
        };

        self.emit(OrchestratorEvent::StepFinish { step }).await?;
        self.publish(DomainEvent::StepCompleted {
            message_id: self.assistant.id.clone(),
            step,
            tool_calls,
            timestamp: Utc::now(),
        });
        Ok(outcome)
    }

    /// Dispatch every call concurrently and wait for all of them.
    ///
    /// Outcomes are emitted in completion order; the parts keep the order the
    /// provider produced them in.
    async fn execute_tools(&mut self, step: u32, calls: Vec<PendingCall>) -> Result<(), Cancelled> {
        if self.tx.is_closed() {
            return Err(Cancelled);
        }
        let count = calls.len();
        let mut running = FuturesUnordered::new();

        for call in calls {
            if let Some(part) = self.assistant.tool_invocation_mut(&call.call_id)
                && let Err(e) = part.advance(ToolState::Executing)
            {
                warn!(error = %e, "Tool call already resolved");
            }
            self.emit(OrchestratorEvent::ToolExecuting {
                call_id: call.call_id.clone(),
            })
            .await?;

            let tools = Arc::clone(&self.config.tools);
            let PendingCall {
                call_id,
                tool_name,
                input,
                ..
            } = call;
            let name = tool_name.clone();
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let result = tools.dispatch(&name, &input).await;
                (result, started.elapsed())
            });
            running.push(async move { (call_id, tool_name, handle.await) });
        }

        while let Some((call_id, tool_name, joined)) = running.next().await {
            let (envelope, elapsed) = match joined {
                Ok((Ok(envelope), elapsed)) => (envelope, elapsed),
                // Unknown tool: the model gets a failure it can react to
                Ok((Err(e), elapsed)) => (Envelope::failure(e.to_string()), elapsed),
                Err(e) => (
                    Envelope::failure(format!("tool task failed: {e}")),
                    Duration::ZERO,
                ),
            };
            self.tool_calls_made += 1;
            debug!(
                tool = %tool_name,
                call_id = %call_id,
                success = envelope.is_success(),
                duration_ms = elapsed.as_millis() as u64,
                "Tool finished"
            );
            self.publish(DomainEvent::ToolExecuted {
                tool_name,
                call_id: call_id.clone(),
                success: envelope.is_success(),
                duration_ms: elapsed.as_millis() as u64,
                timestamp: Utc::now(),
            });

            let event = match envelope {
                Envelope::Failure(reason) => {
                    if let Some(part) = self.assistant.tool_invocation_mut(&call_id)
                        && let Err(e) = part.set_error(reason.clone())
                    {
                        warn!(error = %e, "Tool outcome recorded twice");
                    }
                    OrchestratorEvent::ToolOutputError {
                        call_id,
                        error_text: reason,
                    }
                }
                success => {
                    let output = success.to_value();
                    if let Some(part) = self.assistant.tool_invocation_mut(&call_id)
                        && let Err(e) = part.set_output(output.clone())
                    {
                        warn!(error = %e, "Tool outcome recorded twice");
                    }
                    OrchestratorEvent::ToolOutputAvailable { call_id, output }
                }
            };
            self.emit(event).await?;
        }

        self.emit(OrchestratorEvent::ToolResultsReady { step, count })
            .await
    }

    fn request(&self) -> ProviderRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(ModelMessage::system(prompt));
        }
        messages.extend(ModelMessage::from_history(&self.history));
        messages.extend(ModelMessage::from_history(std::slice::from_ref(
            &self.assistant,
        )));

        ProviderRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            tools: self.config.tools.definitions(),
        }
    }

    async fn push_text(&mut self, open: &mut Option<String>, delta: String) -> Result<(), Cancelled> {
        let part_id = match open.clone() {
            Some(id) => id,
            None => {
                let id = format!("txt_{}", Uuid::new_v4().simple());
                self.assistant.parts.push(Part::text(&id, ""));
                self.emit(OrchestratorEvent::TextStart {
                    part_id: id.clone(),
                })
                .await?;
                *open = Some(id.clone());
                id
            }
        };
        if let Some(Part::Text { text, .. }) = self.assistant.part_mut(&part_id) {
            text.push_str(&delta);
        }
        self.emit(OrchestratorEvent::TextDelta { part_id, delta }).await
    }

    async fn close_text(&mut self, open: &mut Option<String>) -> Result<(), Cancelled> {
        match open.take() {
            Some(part_id) => self.emit(OrchestratorEvent::TextEnd { part_id }).await,
            None => Ok(()),
        }
    }

    async fn start_call(
        &mut self,
        pending: &mut Vec<PendingCall>,
        proposed_id: &str,
        tool_name: &str,
    ) -> Result<usize, Cancelled> {
        let call_id = self.unique_call_id(proposed_id);
        self.assistant
            .parts
            .push(Part::ToolInvocation(ToolInvocation::new(&call_id, tool_name)));
        pending.push(PendingCall {
            call_id: call_id.clone(),
            tool_name: tool_name.to_string(),
            raw_args: String::new(),
            input: Value::Null,
        });
        self.emit(OrchestratorEvent::ToolInputStart {
            call_id,
            tool_name: tool_name.to_string(),
        })
        .await?;
        Ok(pending.len() - 1)
    }

    /// Provider ids are kept when usable; empty or repeated ids are replaced.
    fn unique_call_id(&self, proposed: &str) -> String {
        if proposed.is_empty() || self.assistant.part(proposed).is_some() {
            format!("call_{}", Uuid::new_v4().simple())
        } else {
            proposed.to_string()
        }
    }

    async fn emit(&self, event: OrchestratorEvent) -> Result<(), Cancelled> {
        self.tx.send(event).await.map_err(|_| Cancelled)
    }

    async fn fail(&self, message: String) {
        warn!(message_id = %self.assistant.id, error = %message, "Turn failed");
        self.publish(DomainEvent::ErrorOccurred {
            context: "orchestrator".into(),
            error_message: message.clone(),
            timestamp: Utc::now(),
        });
        let _ = self.tx.send(OrchestratorEvent::Error { message }).await;
    }

    async fn finish(&self, reason: FinishReason, steps: u32) {
        info!(
            message_id = %self.assistant.id,
            steps,
            tool_calls = self.tool_calls_made,
            reason = ?reason,
            "Turn finished"
        );
        self.publish(DomainEvent::ResponseGenerated {
            message_id: self.assistant.id.clone(),
            model: self.config.model.clone(),
            steps,
            tokens_used: self.usage.map(|u| u.total_tokens).unwrap_or(0),
            timestamp: Utc::now(),
        });
        let _ = self
            .tx
            .send(OrchestratorEvent::Finish {
                reason,
                steps,
                tool_calls_made: self.tool_calls_made,
                usage: self.usage,
            })
            .await;
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Parse the model's argument string. Anything that is not JSON is passed on
/// as a JSON string, so schema validation rejects it with a clear reason.
fn parse_arguments(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(raw.to_string()))
}
