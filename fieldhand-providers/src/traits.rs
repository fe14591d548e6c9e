//! Shared provider traits and the conversation data model.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result alias used by chat providers.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Error type shared by provider implementations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider is misconfigured or missing credentials.
    #[error("provider not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// The supplied request was invalid for the target model.
    #[error("invalid completion request: {reason}")]
    InvalidRequest {
        /// Reason describing why the request could not be processed.
        reason: String,
    },

    /// Transport-level failures (network, protocol, etc.).
    #[error("provider transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The provider rejected the request due to rate limiting.
    #[error("provider rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Suggested delay before retrying.
        retry_after: Option<Duration>,
    },

    /// The provider returned a malformed response.
    #[error("provider response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },
}

impl ProviderError {
    /// Convenience constructor for invalid requests.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for malformed responses.
    #[must_use]
    pub fn response(reason: impl Into<String>) -> Self {
        Self::Response {
            reason: reason.into(),
        }
    }
}

/// Minimal metadata describing a provider instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderMetadata {
    provider: &'static str,
    model: String,
}

impl ProviderMetadata {
    /// Creates metadata for the supplied provider and model identifier.
    #[must_use]
    pub fn new(provider: &'static str, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Returns the provider identifier (e.g., "gemini").
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }

    /// Returns the configured model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Authorship of a conversation turn.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User-authored content, including tool results echoed back to the model.
    User,
    /// Model-authored content, including requested tool calls.
    Model,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Model => "model",
        })
    }
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ToolCall {
    /// Name of the tool the model wants to run.
    pub name: String,
    /// Arguments as a JSON object.
    pub args: Value,
}

/// The outcome of one tool invocation, echoed back to the model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ToolResult {
    /// Name of the tool that produced this result.
    pub name: String,
    /// Result payload. Tool failures travel through here as text rather
    /// than aborting the conversation.
    pub output: Value,
}

/// One piece of a conversation turn.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub enum Part {
    /// Plain text content.
    Text(String),
    /// A tool invocation requested by the model.
    ToolCall(ToolCall),
    /// A tool result supplied back to the model.
    ToolResult(ToolResult),
}

/// A single conversation turn: who spoke and what they said.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Turn {
    /// Authorship of the turn.
    pub role: Role,
    /// Ordered content parts.
    pub parts: Vec<Part>,
}

impl Turn {
    /// Creates a user turn containing plain text.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Creates a model turn with the supplied parts.
    #[must_use]
    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }

    /// Creates a user turn carrying tool results back to the model.
    #[must_use]
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            parts: results.into_iter().map(Part::ToolResult).collect(),
        }
    }

    /// Returns the tool calls requested in this turn, in order.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Concatenates the text parts of this turn, if any.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let fragments: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if fragments.is_empty() {
            None
        } else {
            Some(fragments.join("\n"))
        }
    }
}

/// Declaration of a tool offered to the model, already rendered in the
/// provider's schema dialect.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ToolDeclaration {
    /// Tool name as exposed to the model.
    pub name: String,
    /// One-line description shown to the model.
    pub description: String,
    /// Parameter schema in the provider's dialect.
    pub parameters: Value,
}

/// Response from one completion call.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelResponse {
    /// The model's turn, or `None` when the provider returned no candidates.
    pub turn: Option<Turn>,
}

/// Trait implemented by all chat providers.
///
/// A provider receives the full conversation history plus the current tool
/// declarations and returns the model's next turn. The orchestration loop
/// decides what to do with it.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Returns basic metadata describing the provider instance.
    fn metadata(&self) -> &ProviderMetadata;

    /// Requests the model's next turn for the given history.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] when the request cannot be built, sent,
    /// or the response cannot be decoded.
    async fn complete(
        &self,
        history: &[Turn],
        tools: &[ToolDeclaration],
    ) -> ProviderResult<ModelResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_collects_tool_calls_in_order() {
        let turn = Turn::model(vec![
            Part::Text("thinking".into()),
            Part::ToolCall(ToolCall {
                name: "crm_query".into(),
                args: json!({"query": "SELECT Id FROM Account"}),
            }),
            Part::ToolCall(ToolCall {
                name: "crm_api_request".into(),
                args: json!({"method": "GET", "path": "/sobjects"}),
            }),
        ]);

        let calls = turn.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "crm_query");
        assert_eq!(calls[1].name, "crm_api_request");
    }

    #[test]
    fn turn_text_joins_fragments() {
        let turn = Turn::model(vec![
            Part::Text("first".into()),
            Part::Text("second".into()),
        ]);
        assert_eq!(turn.text().as_deref(), Some("first\nsecond"));
        assert!(Turn::model(Vec::new()).text().is_none());
    }

    #[test]
    fn tool_results_travel_as_user_turns() {
        let turn = Turn::tool_results(vec![ToolResult {
            name: "crm_query".into(),
            output: json!({"result": "no records"}),
        }]);
        assert_eq!(turn.role, Role::User);
        assert!(turn.tool_calls().is_empty());
    }
}
