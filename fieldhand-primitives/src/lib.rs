//! Core shared types for the fieldhand agent runtime.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod name;
pub mod schema;

/// Error type and result alias shared across the runtime.
pub use error::{Error, Result};
/// Unique identifier for one conversation handled by the orchestration loop.
pub use ids::ConversationId;
/// Validated tool identifier, stable for the process lifetime once registered.
pub use name::ToolName;
/// Parameter schema model and dialect translation.
pub use schema::{DocText, ParameterKind, ParameterSchema, ParameterSpec, SchemaDialect};
