//! Shared error definitions for fieldhand primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the runtime primitives.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided conversation identifier could not be parsed.
    #[error("invalid conversation id: {source}")]
    InvalidConversationId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Tool identifier failed validation.
    #[error("invalid tool name `{name}`: {reason}")]
    InvalidToolName {
        /// The offending identifier string.
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Parameter schema definition failed validation.
    #[error("invalid parameter schema: {reason}")]
    InvalidParameter {
        /// Human-readable reason for rejection.
        reason: String,
    },
}
