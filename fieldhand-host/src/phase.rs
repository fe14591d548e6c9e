//! Phase state machine for the orchestration loop.

use fieldhand_primitives::ConversationId;
use thiserror::Error;
use tracing::debug;

/// Discrete phases a conversation loop can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Waiting on the model provider for the next turn.
    AwaitingModel,
    /// Executing the tool calls the model requested.
    DispatchingTools,
    /// Loop finished with a final answer (including graceful budget
    /// exhaustion).
    Done,
    /// Loop stopped because the provider failed; the only fatal exit.
    Aborted,
}

impl LoopPhase {
    /// Returns `true` once the loop can make no further progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

/// Events that drive phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// The model requested one or more tool calls.
    ToolCallsRequested,
    /// All requested tool results were appended to the history.
    ResultsAppended,
    /// The model produced a final answer (or no content at all).
    FinalAnswer,
    /// The iteration budget ran out.
    BudgetExhausted,
    /// The provider call failed.
    ProviderFailed,
}

/// Phase state manager for one conversation.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTracker {
    conversation_id: ConversationId,
    phase: LoopPhase,
}

impl PhaseTracker {
    /// Constructs a tracker for the given conversation.
    #[must_use]
    pub const fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            phase: LoopPhase::AwaitingModel,
        }
    }

    /// Returns the owning conversation identifier.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Applies a loop event, returning the resulting phase.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::InvalidTransition`] when the supplied event is
    /// not allowed from the current phase.
    pub fn transition(&mut self, event: LoopEvent) -> PhaseResult<LoopPhase> {
        let next = match (self.phase, event) {
            (LoopPhase::AwaitingModel, LoopEvent::ToolCallsRequested) => {
                Some(LoopPhase::DispatchingTools)
            }
            (LoopPhase::AwaitingModel, LoopEvent::FinalAnswer | LoopEvent::BudgetExhausted) => {
                Some(LoopPhase::Done)
            }
            (LoopPhase::AwaitingModel, LoopEvent::ProviderFailed) => Some(LoopPhase::Aborted),
            (LoopPhase::DispatchingTools, LoopEvent::ResultsAppended) => {
                Some(LoopPhase::AwaitingModel)
            }
            _ => None,
        };

        let Some(next_phase) = next else {
            return Err(PhaseError::InvalidTransition {
                conversation_id: self.conversation_id,
                from: self.phase,
                event,
            });
        };

        if next_phase != self.phase {
            debug!(
                conversation_id = %self.conversation_id,
                ?self.phase,
                ?next_phase,
                ?event,
                "conversation phase transition"
            );
            self.phase = next_phase;
        }

        Ok(self.phase)
    }
}

/// Errors emitted by the phase tracker.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// Transition was not permitted from the current phase.
    #[error("invalid loop transition from {from:?} via {event:?} for conversation {conversation_id}")]
    InvalidTransition {
        /// Identifier of the conversation whose transition failed.
        conversation_id: ConversationId,
        /// Phase prior to the attempted transition.
        from: LoopPhase,
        /// Event that triggered the failure.
        event: LoopEvent,
    },
}

/// Result alias used for phase operations.
pub type PhaseResult<T> = Result<T, PhaseError>;
