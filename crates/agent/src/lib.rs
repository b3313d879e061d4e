//! The turn loop of Duckling.
//!
//! A turn runs in bounded **steps**:
//!
//! 1. **Send** the conversation to the provider and stream the reply
//! 2. **If tool calls**: run them concurrently, wait for every outcome, loop back to step 1
//! 3. **If text only**: finish the turn
//!
//! The orchestrator emits [`OrchestratorEvent`]s; the [`Multiplexer`] turns
//! them into sequenced [`Frame`](duckling_core::Frame)s for the wire.

pub mod multiplexer;
pub mod orchestrator;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use multiplexer::Multiplexer;
pub use orchestrator::{OrchestratorConfig, TurnOrchestrator};
pub use stream_event::OrchestratorEvent;

use duckling_core::frame::Frame;
use duckling_core::message::Message;
use tokio::sync::mpsc;

/// Run one turn over `history` and return its wire frames.
pub fn stream_turn(orchestrator: &TurnOrchestrator, history: Vec<Message>) -> mpsc::Receiver<Frame> {
    Multiplexer::spawn(orchestrator.run(history))
}
