//! Fieldhand agent runtime facade.
//!
//! Depend on this crate via `cargo add fieldhand`. It bundles the runtime
//! crates behind feature flags so downstream users can enable or disable
//! components as needed.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use fieldhand_primitives as primitives;

/// Chat model providers (enabled by `providers` feature).
#[cfg(feature = "providers")]
pub use fieldhand_providers as providers;

/// Tool descriptors, registry, synthesis, and CRM tools (enabled by
/// `tools` feature).
#[cfg(feature = "tools")]
pub use fieldhand_tools as tools;

/// Orchestration loop, service surface, and scheduling (enabled by `host`
/// feature).
#[cfg(feature = "host")]
pub use fieldhand_host as host;
