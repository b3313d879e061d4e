//! Generation provider implementations for Duckling.
//!
//! All providers implement the `duckling_core::Provider` trait.
//! The router builds the configured one.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::build_from_config;
