//! Tool execution trait and error taxonomy.

use std::future::Future;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors produced by tool registration and invocation.
///
/// All variants are recoverable within a conversation: the orchestration
/// loop renders them as tool result text rather than aborting.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Requested tool does not exist in the registry.
    #[error("tool `{name}` was not found in the registry")]
    NotFound {
        /// Name of the missing tool.
        name: String,
    },

    /// Tool descriptor failed validation.
    #[error("invalid tool descriptor: {reason}")]
    InvalidDescriptor {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool execution failed.
    #[error("tool execution failed: {reason}")]
    Execution {
        /// Human-readable error returned by the tool implementation.
        reason: String,
    },
}

impl ToolError {
    /// Creates a not-found error for the supplied name.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a descriptor validation error from the supplied reason.
    #[must_use]
    pub fn invalid_descriptor(reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            reason: reason.into(),
        }
    }

    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

/// Trait implemented by tool executors.
///
/// Handlers take a JSON argument map and return text for the model. A
/// returned `Err` is still conversation-recoverable; the loop reports it as
/// the tool's result.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invokes the tool with the given arguments, returning result text.
    async fn call(&self, args: Map<String, Value>) -> ToolResult<String>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Send + Sync + Fn(Map<String, Value>) -> Fut,
    Fut: Future<Output = ToolResult<String>> + Send,
{
    async fn call(&self, args: Map<String, Value>) -> ToolResult<String> {
        (self)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler = |args: Map<String, Value>| async move {
            Ok(format!("got {} args", args.len()))
        };

        let mut args = Map::new();
        args.insert("a".into(), Value::from(1));
        assert_eq!(handler.call(args).await.unwrap(), "got 1 args");
    }
}
