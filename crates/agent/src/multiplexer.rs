//! Stream multiplexer: orchestrator events in, sequenced wire frames out.
//!
//! Every frame gets a global `seq` and a per-part `partSeq`, so a client can
//! put interleaved parts back in order and drop duplicates. Exactly one
//! terminal `finish` frame ends every stream; anything still open at that
//! point is closed first.

use duckling_core::frame::{FinishReason, Frame, FrameEvent};
use duckling_core::message::Role;
use duckling_core::provider::Usage;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::stream_event::OrchestratorEvent;

const UNFINISHED_TOOL: &str = "stream ended before the tool call completed";

#[derive(Debug, Default)]
pub struct Multiplexer {
    message_id: Option<String>,
    seq: u64,
    part_seqs: HashMap<String, u64>,
    open_text: Vec<String>,
    open_tools: Vec<String>,
    finished: bool,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal frame has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Frames for one orchestrator event. Events after the terminal frame are ignored.
    pub fn encode(&mut self, event: &OrchestratorEvent) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }

        match event {
            OrchestratorEvent::MessageStart { message_id } => {
                self.message_id = Some(message_id.clone());
                vec![self.message_frame(FrameEvent::MessageStart {
                    role: Role::Assistant,
                })]
            }
            OrchestratorEvent::StepStart { step } => {
                vec![self.message_frame(FrameEvent::StepStart { step: *step })]
            }
            OrchestratorEvent::StepFinish { step } => {
                vec![self.message_frame(FrameEvent::StepFinish { step: *step })]
            }
            OrchestratorEvent::ToolResultsReady { step, count } => {
                vec![self.message_frame(FrameEvent::ToolResultsReady {
                    step: *step,
                    count: *count,
                })]
            }

            OrchestratorEvent::TextStart { part_id } => {
                self.open_text.push(part_id.clone());
                vec![self.frame(part_id, FrameEvent::TextStart)]
            }
            OrchestratorEvent::TextDelta { part_id, delta } => {
                vec![self.frame(
                    part_id,
                    FrameEvent::TextDelta {
                        delta: delta.clone(),
                    },
                )]
            }
            OrchestratorEvent::TextEnd { part_id } => {
                self.open_text.retain(|id| id != part_id);
                vec![self.frame(part_id, FrameEvent::TextEnd)]
            }

            OrchestratorEvent::ToolInputStart { call_id, tool_name } => {
                self.open_tools.push(call_id.clone());
                vec![self.frame(
                    call_id,
                    FrameEvent::ToolInputStart {
                        tool_name: tool_name.clone(),
                    },
                )]
            }
            OrchestratorEvent::ToolInputDelta { call_id, delta } => {
                vec![self.frame(
                    call_id,
                    FrameEvent::ToolInputDelta {
                        delta: delta.clone(),
                    },
                )]
            }
            OrchestratorEvent::ToolInputAvailable {
                call_id,
                tool_name,
                input,
            } => vec![self.frame(
                call_id,
                FrameEvent::ToolInputAvailable {
                    tool_name: tool_name.clone(),
                    input: input.clone(),
                },
            )],
            OrchestratorEvent::ToolExecuting { call_id } => {
                vec![self.frame(call_id, FrameEvent::ToolExecuting)]
            }
            OrchestratorEvent::ToolOutputAvailable { call_id, output } => {
                self.open_tools.retain(|id| id != call_id);
                vec![self.frame(
                    call_id,
                    FrameEvent::ToolOutputAvailable {
                        output: output.clone(),
                    },
                )]
            }
            OrchestratorEvent::ToolOutputError {
                call_id,
                error_text,
            } => {
                self.open_tools.retain(|id| id != call_id);
                vec![self.frame(
                    call_id,
                    FrameEvent::ToolOutputError {
                        error_text: error_text.clone(),
                    },
                )]
            }

            OrchestratorEvent::Finish { reason, usage, .. } => {
                self.terminate(reason.clone(), *usage)
            }
            OrchestratorEvent::Error { message } => self.terminate(
                FinishReason::Error {
                    message: message.clone(),
                },
                None,
            ),
        }
    }

    /// Close the stream with `reason`, e.g. when the event source vanished.
    pub fn close(&mut self, reason: FinishReason) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        self.terminate(reason, None)
    }

    /// Multiplex `events` in a spawned task.
    ///
    /// Dropping the returned receiver drops `events` too, which cancels the
    /// orchestrator.
    pub fn spawn(mut events: mpsc::Receiver<OrchestratorEvent>) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(128);
        tokio::spawn(async move {
            let mut mux = Multiplexer::new();
            while let Some(event) = events.recv().await {
                for frame in mux.encode(&event) {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
                if mux.is_finished() {
                    return;
                }
            }

            tracing::warn!("Event source ended without a terminal event");
            for frame in mux.close(FinishReason::Error {
                message: "event stream ended unexpectedly".into(),
            }) {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    fn terminate(&mut self, reason: FinishReason, usage: Option<Usage>) -> Vec<Frame> {
        let mut frames = Vec::new();
        for part_id in std::mem::take(&mut self.open_text) {
            frames.push(self.frame(&part_id, FrameEvent::TextEnd));
        }
        for call_id in std::mem::take(&mut self.open_tools) {
            frames.push(self.frame(
                &call_id,
                FrameEvent::ToolOutputError {
                    error_text: UNFINISHED_TOOL.into(),
                },
            ));
        }
        frames.push(self.message_frame(FrameEvent::Finish { reason, usage }));
        self.finished = true;
        frames
    }

    fn message_id(&mut self) -> String {
        self.message_id
            .get_or_insert_with(|| format!("msg_{}", Uuid::new_v4().simple()))
            .clone()
    }

    fn message_frame(&mut self, event: FrameEvent) -> Frame {
        let message_id = self.message_id();
        self.frame(&message_id, event)
    }

    fn frame(&mut self, part_id: &str, event: FrameEvent) -> Frame {
        self.seq += 1;
        let part_seq = self.part_seqs.entry(part_id.to_string()).or_insert(0);
        *part_seq += 1;
        let part_seq = *part_seq;
        Frame {
            seq: self.seq,
            message_id: self.message_id(),
            part_id: part_id.to_string(),
            part_seq,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::collect;
    use serde_json::json;

    fn start() -> OrchestratorEvent {
        OrchestratorEvent::MessageStart {
            message_id: "msg_1".into(),
        }
    }

    fn text(part: &str, delta: &str) -> OrchestratorEvent {
        OrchestratorEvent::TextDelta {
            part_id: part.into(),
            delta: delta.into(),
        }
    }

    fn finish() -> OrchestratorEvent {
        OrchestratorEvent::Finish {
            reason: FinishReason::Stop,
            steps: 1,
            tool_calls_made: 0,
            usage: None,
        }
    }

    #[test]
    fn sequences_are_global_and_per_part() {
        let mut mux = Multiplexer::new();
        let mut frames = Vec::new();
        for event in [
            start(),
            OrchestratorEvent::TextStart {
                part_id: "txt_a".into(),
            },
            text("txt_a", "Hel"),
            OrchestratorEvent::ToolInputStart {
                call_id: "call_1".into(),
                tool_name: "weather_lookup".into(),
            },
            text("txt_a", "lo"),
        ] {
            frames.extend(mux.encode(&event));
        }

        let seqs: Vec<u64> = frames.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

        let text_seqs: Vec<u64> = frames
            .iter()
            .filter(|f| f.part_id == "txt_a")
            .map(|f| f.part_seq)
            .collect();
        assert_eq!(text_seqs, vec![1, 2, 3]);
        assert_eq!(frames[3].part_id, "call_1");
        assert_eq!(frames[3].part_seq, 1);
        assert!(frames.iter().all(|f| f.message_id == "msg_1"));
    }

    #[test]
    fn message_scoped_events_use_message_id() {
        let mut mux = Multiplexer::new();
        mux.encode(&start());
        let frames = mux.encode(&OrchestratorEvent::StepStart { step: 1 });
        assert_eq!(frames[0].part_id, "msg_1");
        assert_eq!(frames[0].part_seq, 2);
    }

    #[test]
    fn terminal_frame_closes_open_parts() {
        let mut mux = Multiplexer::new();
        mux.encode(&start());
        mux.encode(&OrchestratorEvent::TextStart {
            part_id: "txt_a".into(),
        });
        mux.encode(&OrchestratorEvent::ToolInputStart {
            call_id: "call_1".into(),
            tool_name: "github_issue".into(),
        });

        let frames = mux.encode(&OrchestratorEvent::Error {
            message: "provider went away".into(),
        });
        let kinds: Vec<&str> = frames.iter().map(|f| f.event.kind()).collect();
        assert_eq!(kinds, vec!["text-end", "tool-output-error", "finish"]);
        assert_eq!(
            frames[2].finish_reason(),
            Some(&FinishReason::Error {
                message: "provider went away".into()
            })
        );
        assert!(mux.is_finished());
        assert!(mux.encode(&finish()).is_empty());
    }

    #[test]
    fn resolved_tools_are_not_closed_again() {
        let mut mux = Multiplexer::new();
        mux.encode(&start());
        mux.encode(&OrchestratorEvent::ToolInputStart {
            call_id: "call_1".into(),
            tool_name: "weather_lookup".into(),
        });
        mux.encode(&OrchestratorEvent::ToolOutputAvailable {
            call_id: "call_1".into(),
            output: json!({"success": true}),
        });
        let frames = mux.encode(&finish());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_terminal());
    }

    #[test]
    fn error_before_message_start_still_has_a_message_id() {
        let mut mux = Multiplexer::new();
        let frames = mux.encode(&OrchestratorEvent::Error {
            message: "bad key".into(),
        });
        assert_eq!(frames.len(), 1);
        assert!(frames[0].message_id.starts_with("msg_"));
        assert_eq!(frames[0].part_id, frames[0].message_id);
    }

    #[tokio::test]
    async fn spawn_synthesizes_finish_when_source_ends() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(start()).await.unwrap();
        tx.send(OrchestratorEvent::TextStart {
            part_id: "txt_a".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let frames = collect(Multiplexer::spawn(rx)).await;
        let kinds: Vec<&str> = frames.iter().map(|f| f.event.kind()).collect();
        assert_eq!(kinds, vec!["message-start", "text-start", "text-end", "finish"]);
        assert!(frames.last().unwrap().finish_reason().unwrap().is_error());
    }

    #[tokio::test]
    async fn spawn_stops_after_terminal_frame() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(start()).await.unwrap();
        tx.send(finish()).await.unwrap();
        tx.send(text("txt_late", "ignored")).await.unwrap();

        let frames = collect(Multiplexer::spawn(rx)).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
    }
}
