//! Folds a frame stream back into conversation messages.
//!
//! The transcript keeps the last applied `partSeq` of every part. A frame at
//! or below it is a replay and is skipped; a frame further ahead than the
//! next expected number is applied anyway and logged. Tool calls only move
//! forward through their lifecycle; a frame that would move one backwards is
//! rejected and leaves the transcript as it was.

use duckling_core::frame::{FinishReason, Frame, FrameEvent};
use duckling_core::message::{Message, Part, Role, StateRegression, ToolInvocation, ToolState};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of applying one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// Already seen; nothing changed.
    Duplicate,
}

/// Where the current turn stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// No assistant message has started yet.
    Idle,
    Streaming,
    Completed,
    /// The step budget ran out; the answer may be partial.
    Incomplete,
    Failed(String),
}

impl TurnStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Incomplete | Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    StateRegression(#[from] StateRegression),

    #[error("part {part_id} is not a {expected} part")]
    PartKindMismatch {
        part_id: String,
        expected: &'static str,
    },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame stream failed: {0}")]
    Stream(String),
}

#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    last_part_seq: HashMap<(String, String), u64>,
    status: TurnStatus,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self::with_history(Vec::new())
    }

    /// Start from messages the client already holds.
    pub fn with_history(messages: Vec<Message>) -> Self {
        Self {
            messages,
            last_part_seq: HashMap::new(),
            status: TurnStatus::Idle,
        }
    }

    /// Apply one frame.
    pub fn apply(&mut self, frame: &Frame) -> Result<Applied, ReconcileError> {
        let key = (frame.message_id.clone(), frame.part_id.clone());
        let last = self.last_part_seq.get(&key).copied().unwrap_or(0);

        if frame.part_seq <= last {
            debug!(seq = frame.seq, part_id = %frame.part_id, part_seq = frame.part_seq, "Skipping duplicate frame");
            return Ok(Applied::Duplicate);
        }
        if frame.part_seq > last + 1 {
            warn!(
                part_id = %frame.part_id,
                expected = last + 1,
                got = frame.part_seq,
                "Gap in part sequence, applying anyway"
            );
        }

        self.apply_event(frame)?;
        self.last_part_seq.insert(key, frame.part_seq);
        Ok(Applied::Applied)
    }

    /// An ordered snapshot of every message.
    pub fn view(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn status(&self) -> &TurnStatus {
        &self.status
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Consume the transcript, keeping its messages as the next turn's history.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    fn apply_event(&mut self, frame: &Frame) -> Result<(), ReconcileError> {
        match &frame.event {
            FrameEvent::MessageStart { role } => {
                self.message_mut(&frame.message_id, *role);
                self.status = TurnStatus::Streaming;
            }
            FrameEvent::StepStart { .. }
            | FrameEvent::StepFinish { .. }
            | FrameEvent::ToolResultsReady { .. } => {
                self.message_mut(&frame.message_id, Role::Assistant);
            }

            FrameEvent::TextStart | FrameEvent::TextEnd => {
                self.text_mut(frame)?;
            }
            FrameEvent::TextDelta { delta } => self.text_mut(frame)?.push_str(delta),

            FrameEvent::ToolInputStart { tool_name } => {
                name_call(self.call_mut(frame, tool_name)?, tool_name);
            }
            FrameEvent::ToolInputDelta { delta } => {
                let call = self.call_mut(frame, "")?;
                if call.state != ToolState::InputStreaming {
                    return Err(StateRegression {
                        call_id: call.call_id.clone(),
                        from: call.state,
                        to: ToolState::InputStreaming,
                    }
                    .into());
                }
                call.push_input_text(delta);
            }
            FrameEvent::ToolInputAvailable { tool_name, input } => {
                let call = self.call_mut(frame, tool_name)?;
                call.set_input(input.clone())?;
                name_call(call, tool_name);
            }
            FrameEvent::ToolExecuting => {
                self.call_mut(frame, "")?.advance(ToolState::Executing)?;
            }
            FrameEvent::ToolOutputAvailable { output } => {
                self.call_mut(frame, "")?.set_output(output.clone())?;
            }
            FrameEvent::ToolOutputError { error_text } => {
                self.call_mut(frame, "")?.set_error(error_text.clone())?;
            }

            FrameEvent::Finish { reason, .. } => {
                self.message_mut(&frame.message_id, Role::Assistant);
                self.status = match reason {
                    FinishReason::Stop => TurnStatus::Completed,
                    FinishReason::StepBudgetExhausted => TurnStatus::Incomplete,
                    FinishReason::Error { message } => TurnStatus::Failed(message.clone()),
                };
            }
        }
        Ok(())
    }

    fn message_mut(&mut self, id: &str, role: Role) -> &mut Message {
        let index = match self.messages.iter().position(|m| m.id == id) {
            Some(index) => index,
            None => {
                self.messages.push(Message::new(id, role));
                self.status = TurnStatus::Streaming;
                self.messages.len() - 1
            }
        };
        &mut self.messages[index]
    }

    fn text_mut(&mut self, frame: &Frame) -> Result<&mut String, ReconcileError> {
        let message = self.message_mut(&frame.message_id, Role::Assistant);
        if message.part(&frame.part_id).is_none() {
            message.parts.push(Part::text(frame.part_id.clone(), ""));
        }
        match message.part_mut(&frame.part_id) {
            Some(Part::Text { text, .. }) => Ok(text),
            _ => Err(ReconcileError::PartKindMismatch {
                part_id: frame.part_id.clone(),
                expected: "text",
            }),
        }
    }

    /// The call for `frame`, created under `tool_name` if it is new.
    ///
    /// An existing call is returned untouched; callers name it only once
    /// their transition has succeeded.
    fn call_mut(
        &mut self,
        frame: &Frame,
        tool_name: &str,
    ) -> Result<&mut ToolInvocation, ReconcileError> {
        let message = self.message_mut(&frame.message_id, Role::Assistant);
        if message.part(&frame.part_id).is_none() {
            message.parts.push(Part::ToolInvocation(ToolInvocation::new(
                frame.part_id.clone(),
                tool_name,
            )));
        }
        match message.part_mut(&frame.part_id) {
            Some(Part::ToolInvocation(call)) => Ok(call),
            _ => Err(ReconcileError::PartKindMismatch {
                part_id: frame.part_id.clone(),
                expected: "tool-invocation",
            }),
        }
    }
}

/// Fill in a name that earlier frames did not carry.
fn name_call(call: &mut ToolInvocation, tool_name: &str) {
    if call.tool_name.is_empty() {
        call.tool_name = tool_name.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Stream {
        seq: u64,
        part_seqs: HashMap<String, u64>,
    }

    impl Stream {
        fn new() -> Self {
            Self {
                seq: 0,
                part_seqs: HashMap::new(),
            }
        }

        fn frame(&mut self, part_id: &str, event: FrameEvent) -> Frame {
            self.seq += 1;
            let part_seq = self.part_seqs.entry(part_id.into()).or_insert(0);
            *part_seq += 1;
            Frame {
                seq: self.seq,
                message_id: "msg_1".into(),
                part_id: part_id.into(),
                part_seq: *part_seq,
                event,
            }
        }
    }

    fn delta(text: &str) -> FrameEvent {
        FrameEvent::TextDelta { delta: text.into() }
    }

    fn finish(reason: FinishReason) -> FrameEvent {
        FrameEvent::Finish {
            reason,
            usage: None,
        }
    }

    fn start(s: &mut Stream) -> Frame {
        s.frame(
            "msg_1",
            FrameEvent::MessageStart {
                role: Role::Assistant,
            },
        )
    }

    #[test]
    fn text_deltas_concatenate() {
        let mut s = Stream::new();
        let mut t = Transcript::with_history(vec![Message::user("why does my loop hang?")]);
        let frames = vec![
            start(&mut s),
            s.frame("txt_a", FrameEvent::TextStart),
            s.frame("txt_a", delta("What is ")),
            s.frame("txt_a", delta("the exit condition?")),
            s.frame("txt_a", FrameEvent::TextEnd),
            s.frame("msg_1", finish(FinishReason::Stop)),
        ];
        for frame in &frames {
            assert_eq!(t.apply(frame).unwrap(), Applied::Applied);
        }

        let view = t.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].role, Role::User);
        assert_eq!(view[1].role, Role::Assistant);
        assert_eq!(view[1].text(), "What is the exit condition?");
        assert_eq!(t.status(), &TurnStatus::Completed);
    }

    #[test]
    fn duplicates_are_skipped() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        let begin = start(&mut s);
        let hello = s.frame("txt_a", delta("Hello"));
        t.apply(&begin).unwrap();
        t.apply(&hello).unwrap();

        assert_eq!(t.apply(&hello).unwrap(), Applied::Duplicate);
        assert_eq!(t.apply(&begin).unwrap(), Applied::Duplicate);
        assert_eq!(t.view()[0].text(), "Hello");
    }

    #[test]
    fn gaps_are_applied() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        t.apply(&start(&mut s)).unwrap();
        let _lost = s.frame("txt_a", delta("lost "));
        let kept = s.frame("txt_a", delta("kept"));
        assert_eq!(t.apply(&kept).unwrap(), Applied::Applied);
        assert_eq!(t.view()[0].text(), "kept");
    }

    #[test]
    fn tool_lifecycle_builds_invocation() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        let frames = vec![
            start(&mut s),
            s.frame(
                "call_1",
                FrameEvent::ToolInputStart {
                    tool_name: "weather_lookup".into(),
                },
            ),
            s.frame("call_1", FrameEvent::ToolInputDelta { delta: "{\"location\":".into() }),
            s.frame("call_1", FrameEvent::ToolInputDelta { delta: "\"Boston\"}".into() }),
            s.frame(
                "call_1",
                FrameEvent::ToolInputAvailable {
                    tool_name: "weather_lookup".into(),
                    input: json!({"location": "Boston"}),
                },
            ),
            s.frame("call_1", FrameEvent::ToolExecuting),
            s.frame(
                "call_1",
                FrameEvent::ToolOutputAvailable {
                    output: json!({"success": true, "location": "Boston", "temperature": 70}),
                },
            ),
        ];
        for frame in &frames {
            t.apply(frame).unwrap();
        }

        let view = t.view();
        let call = view[0].tool_invocations().next().unwrap();
        assert_eq!(call.tool_name, "weather_lookup");
        assert_eq!(call.state, ToolState::OutputAvailable);
        assert_eq!(call.input, json!({"location": "Boston"}));
        assert_eq!(call.output.as_ref().unwrap()["temperature"], 70);
        assert_eq!(t.status(), &TurnStatus::Streaming);
    }

    #[test]
    fn regression_is_rejected_without_changes() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        t.apply(&start(&mut s)).unwrap();
        t.apply(&s.frame(
            "call_1",
            FrameEvent::ToolInputStart {
                tool_name: "github_issue".into(),
            },
        ))
        .unwrap();
        t.apply(&s.frame(
            "call_1",
            FrameEvent::ToolOutputError {
                error_text: "GitHub API returned 404".into(),
            },
        ))
        .unwrap();
        let before = t.view();

        let late = s.frame("call_1", FrameEvent::ToolExecuting);
        let err = t.apply(&late).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::StateRegression(StateRegression {
                from: ToolState::OutputError,
                to: ToolState::Executing,
                ..
            })
        ));
        assert_eq!(t.view(), before);

        let call = before[0].tool_invocations().next().unwrap();
        assert_eq!(call.error_text.as_deref(), Some("GitHub API returned 404"));
    }

    #[test]
    fn rejected_input_does_not_name_the_call() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        t.apply(&start(&mut s)).unwrap();
        t.apply(&s.frame("call_1", FrameEvent::ToolInputDelta { delta: "{}".into() }))
            .unwrap();
        t.apply(&s.frame("call_1", FrameEvent::ToolExecuting)).unwrap();
        let before = t.view();
        assert_eq!(before[0].tool_invocations().next().unwrap().tool_name, "");

        let late = s.frame(
            "call_1",
            FrameEvent::ToolInputAvailable {
                tool_name: "weather_lookup".into(),
                input: json!({"location": "Boston"}),
            },
        );
        assert!(matches!(
            t.apply(&late),
            Err(ReconcileError::StateRegression(_))
        ));
        assert_eq!(t.view(), before);
    }

    #[test]
    fn late_name_is_filled_in() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        t.apply(&start(&mut s)).unwrap();
        t.apply(&s.frame("call_1", FrameEvent::ToolInputDelta { delta: "{}".into() }))
            .unwrap();
        t.apply(&s.frame(
            "call_1",
            FrameEvent::ToolInputAvailable {
                tool_name: "weather_lookup".into(),
                input: json!({}),
            },
        ))
        .unwrap();

        let call = t.view()[0].tool_invocations().next().cloned().unwrap();
        assert_eq!(call.tool_name, "weather_lookup");
        assert_eq!(call.state, ToolState::InputAvailable);
    }

    #[test]
    fn input_delta_after_input_is_a_regression() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        t.apply(&s.frame(
            "call_1",
            FrameEvent::ToolInputAvailable {
                tool_name: "log_debug_step".into(),
                input: json!({"step": "a", "finding": "b"}),
            },
        ))
        .unwrap();
        let err = t
            .apply(&s.frame("call_1", FrameEvent::ToolInputDelta { delta: "x".into() }))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::StateRegression(_)));
    }

    #[test]
    fn parts_keep_first_seen_order_when_interleaved() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        let frames = vec![
            start(&mut s),
            s.frame("txt_a", delta("Let me check. ")),
            s.frame(
                "call_1",
                FrameEvent::ToolInputStart {
                    tool_name: "weather_lookup".into(),
                },
            ),
            s.frame("txt_a", delta("One moment.")),
            s.frame("txt_b", delta("It is sunny.")),
        ];
        for frame in &frames {
            t.apply(frame).unwrap();
        }
        let ids: Vec<String> = t.view()[0].parts.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["txt_a", "call_1", "txt_b"]);
        assert_eq!(t.view()[0].text(), "Let me check. One moment.It is sunny.");
    }

    #[test]
    fn out_of_order_tool_frames_fill_in_the_name() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        let _start = s.frame(
            "call_1",
            FrameEvent::ToolInputStart {
                tool_name: "weather_lookup".into(),
            },
        );
        let delta = s.frame("call_1", FrameEvent::ToolInputDelta { delta: "{}".into() });
        t.apply(&delta).unwrap();
        assert_eq!(t.view()[0].tool_invocations().next().unwrap().tool_name, "");

        t.apply(&s.frame(
            "call_1",
            FrameEvent::ToolInputAvailable {
                tool_name: "weather_lookup".into(),
                input: json!({}),
            },
        ))
        .unwrap();
        assert_eq!(
            t.view()[0].tool_invocations().next().unwrap().tool_name,
            "weather_lookup"
        );
    }

    #[test]
    fn text_event_on_a_tool_part_is_rejected() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        t.apply(&s.frame(
            "call_1",
            FrameEvent::ToolInputStart {
                tool_name: "weather_lookup".into(),
            },
        ))
        .unwrap();
        let err = t.apply(&s.frame("call_1", delta("oops"))).unwrap_err();
        assert!(matches!(err, ReconcileError::PartKindMismatch { expected: "text", .. }));
    }

    #[test]
    fn finish_reasons_map_to_status() {
        let mut s = Stream::new();
        let mut t = Transcript::new();
        assert_eq!(t.status(), &TurnStatus::Idle);
        t.apply(&start(&mut s)).unwrap();
        t.apply(&s.frame("msg_1", finish(FinishReason::StepBudgetExhausted)))
            .unwrap();
        assert_eq!(t.status(), &TurnStatus::Incomplete);

        let mut s = Stream::new();
        let mut t = Transcript::new();
        t.apply(&s.frame(
            "msg_1",
            finish(FinishReason::Error {
                message: "rate limited".into(),
            }),
        ))
        .unwrap();
        assert_eq!(t.status(), &TurnStatus::Failed("rate limited".into()));
        assert!(t.status().is_finished());
    }
}
