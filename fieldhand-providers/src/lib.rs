//! Chat model providers for the fieldhand agent runtime.
//!
//! The crate defines the [`ChatProvider`] trait that the orchestration loop
//! drives, the conversation data model ([`Turn`], [`Part`], [`ToolCall`]),
//! and a production Gemini client that speaks the function-calling protocol
//! over HTTPS.

#![warn(missing_docs, clippy::pedantic)]

pub mod gemini;
mod http_client;
mod traits;
pub mod wire;

pub use gemini::{GEMINI_API_KEY_ENV, GeminiConfig, GeminiProvider};
pub use traits::{
    ChatProvider, ModelResponse, Part, ProviderError, ProviderMetadata, ProviderResult, Role,
    ToolCall, ToolDeclaration, ToolResult, Turn,
};
