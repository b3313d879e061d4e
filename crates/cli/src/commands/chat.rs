//! `duckling chat`: interactive or single-message debugging chat.
//!
//! Turns run in-process by default. With `--remote` the history is posted
//! to a gateway and its SSE stream is decoded instead; either way frames go
//! through the same transcript so the printed output and the kept history
//! match what a browser client would show.

use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use duckling_agent::{OrchestratorConfig, TurnOrchestrator};
use duckling_config::AppConfig;
use duckling_core::event::EventBus;
use duckling_core::frame::{FinishReason, Frame, FrameEvent};
use duckling_core::message::Message;
use duckling_transcript::{Applied, Transcript, decode_frames};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

enum Backend {
    Local(TurnOrchestrator),
    Remote { client: reqwest::Client, url: String },
}

pub async fn run(message: Option<String>, remote: Option<String>) -> CliResult<()> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let backend = match remote {
        Some(url) => Backend::Remote {
            client: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
        },
        None => {
            if !config.has_api_key() {
                print_missing_key();
                return Err("No API key found. See above for setup instructions.".into());
            }
            Backend::Local(local_orchestrator(&config)?)
        }
    };

    if let Some(msg) = message {
        backend.turn(&[], &msg).await?;
        return Ok(());
    }

    println!();
    println!("  Duckling, interactive mode");
    match &backend {
        Backend::Local(orchestrator) => {
            let settings = orchestrator.config();
            println!("  Provider:  {} ({})", settings.provider.name(), settings.model);
            println!("  Tools:     {}", settings.tools.names().join(", "));
            println!("  Steps:     {} per turn", settings.max_steps);
        }
        Backend::Remote { url, .. } => println!("  Gateway:   {url}"),
    }
    println!();
    println!("  Describe your bug and press Enter. Type 'exit' to quit.");
    println!();

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        match backend.turn(&history, input).await {
            Ok(messages) => history = messages,
            Err(e) => eprintln!("  [Error] {e}"),
        }
        println!();
    }

    println!();
    println!("  Quack. Good luck with the bug.");
    Ok(())
}

fn local_orchestrator(config: &AppConfig) -> CliResult<TurnOrchestrator> {
    let provider = duckling_providers::build_from_config(config);
    let tools = Arc::new(duckling_tools::default_registry(config)?);
    let model = duckling_providers::router::resolve_model(config);
    let settings = OrchestratorConfig::from_app_config(config, provider, tools, model);
    Ok(TurnOrchestrator::new(settings).with_event_bus(Arc::new(EventBus::default())))
}

fn print_missing_key() {
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    GEMINI_API_KEY      (default provider)");
    eprintln!("    OPENAI_API_KEY      (with provider = \"openai\")");
    eprintln!("    DUCKLING_API_KEY    (any provider)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    eprintln!("  Or point at a running gateway with --remote http://127.0.0.1:42618");
    eprintln!();
}

impl Backend {
    /// Run one turn and return the updated history.
    async fn turn(&self, history: &[Message], input: &str) -> CliResult<Vec<Message>> {
        let mut history = history.to_vec();
        history.push(Message::user(input));
        let mut transcript = Transcript::with_history(history.clone());

        match self {
            Backend::Local(orchestrator) => {
                let mut frames = duckling_agent::stream_turn(orchestrator, history);
                while let Some(frame) = frames.recv().await {
                    show(&mut transcript, &frame)?;
                }
            }
            Backend::Remote { client, url } => {
                let response = client
                    .post(format!("{url}/api/chat"))
                    .json(&serde_json::json!({ "messages": history }))
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let body: serde_json::Value = response.json().await.unwrap_or_default();
                    let error = body["error"].as_str().unwrap_or("request failed");
                    return Err(format!("Gateway returned {status}: {error}").into());
                }

                let mut frames = std::pin::pin!(decode_frames(response.bytes_stream()));
                while let Some(frame) = frames.next().await {
                    show(&mut transcript, &frame?)?;
                }
            }
        }

        if !transcript.status().is_finished() {
            println!();
            warn!("Stream ended without a finish frame");
        }
        Ok(transcript.into_messages())
    }
}

/// Apply a frame and print what it adds.
fn show(transcript: &mut Transcript, frame: &Frame) -> std::io::Result<()> {
    match transcript.apply(frame) {
        Ok(Applied::Applied) => {}
        Ok(Applied::Duplicate) => return Ok(()),
        Err(e) => {
            warn!(error = %e, seq = frame.seq, "Dropping frame");
            return Ok(());
        }
    }

    if let Some(text) = describe(&frame.event) {
        let mut stdout = std::io::stdout();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

/// Terminal output for a frame, if it has any.
fn describe(event: &FrameEvent) -> Option<String> {
    match event {
        FrameEvent::MessageStart { .. } => Some("Duckling: ".into()),
        FrameEvent::TextDelta { delta } => Some(delta.clone()),
        FrameEvent::ToolInputAvailable { tool_name, .. } => Some(format!("\n  Tool: {tool_name}\n")),
        FrameEvent::ToolOutputAvailable { output } => Some(format!("  Result: {output}\n")),
        FrameEvent::ToolOutputError { error_text } => Some(format!("  Failed: {error_text}\n")),
        FrameEvent::Finish { reason, .. } => Some(match reason {
            FinishReason::Stop => "\n".into(),
            FinishReason::StepBudgetExhausted => {
                "\n  (step budget reached, the answer may be incomplete)\n".into()
            }
            FinishReason::Error { message } => format!("\n  [Error] {message}\n"),
        }),
        _ => None,
    }
}
