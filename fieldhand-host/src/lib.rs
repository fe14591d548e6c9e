//! Host runtime for fieldhand agents: the bounded tool-calling
//! orchestration loop, the JSON discovery/invocation service, and the
//! query scheduler.

#![warn(missing_docs, clippy::pedantic)]

mod conversation;
mod orchestrator;
mod phase;
mod scheduler;
pub mod service;

pub use conversation::Conversation;
pub use orchestrator::{
    CollectingSink, ConversationOutcome, Orchestrator, OrchestratorConfig, OutcomeSink,
    ToolInvocation, TracingSink,
};
pub use phase::{LoopEvent, LoopPhase, PhaseError, PhaseResult, PhaseTracker};
pub use scheduler::{QueryScheduler, SchedulerError, SchedulerLimits, SchedulerResult};
