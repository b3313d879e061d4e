//! Client side of the frame stream.
//!
//! [`decode_frames`] turns SSE bytes into frames, [`Transcript`] folds frames
//! into messages and [`render`] prints the result the way the chat page does.

pub mod reconciler;
pub mod render;
pub mod sse;

pub use reconciler::{Applied, ReconcileError, Transcript, TurnStatus};
pub use render::render;
pub use sse::decode_frames;
