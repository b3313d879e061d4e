//! # Duckling Core
//!
//! Domain types, traits, and error definitions for the Duckling debugging
//! assistant. This crate has **zero framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping the generation provider via configuration
//! - Easy testing with scripted providers and stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod frame;
pub mod message;
pub mod provider;
pub mod schema;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError, ValidationError};
pub use event::{DomainEvent, EventBus};
pub use frame::{FinishReason, Frame, FrameEvent};
pub use message::{Message, Part, Role, StateRegression, ToolInvocation, ToolState};
pub use provider::{
    ModelMessage, ModelRole, ModelToolCall, Provider, ProviderRequest, ProviderResponse,
    StreamChunk, ToolCallDelta, ToolDefinition, Usage,
};
pub use schema::{parse_input, schema_for, validate_against_schema};
pub use tool::{Envelope, Tool, ToolRegistry};
