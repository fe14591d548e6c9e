//! Per-query conversation state.

use std::collections::HashMap;

use fieldhand_primitives::ConversationId;
use fieldhand_providers::Turn;

/// State owned by one orchestration loop: the conversation history, the
/// per-tool consecutive-failure counters, and the iteration counter.
///
/// A conversation is created when a query arrives and dropped when the loop
/// returns; nothing here is persisted or shared.
#[derive(Debug)]
pub struct Conversation {
    id: ConversationId,
    history: Vec<Turn>,
    failure_counts: HashMap<String, u32>,
    iteration: u32,
}

impl Conversation {
    /// Starts a conversation with the user's query as the first turn.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: ConversationId::random(),
            history: vec![Turn::user_text(query)],
            failure_counts: HashMap::new(),
            iteration: 0,
        }
    }

    /// Returns the conversation identifier.
    #[must_use]
    pub const fn id(&self) -> ConversationId {
        self.id
    }

    /// Returns the ordered history.
    #[must_use]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Appends a turn to the history.
    pub fn push_turn(&mut self, turn: Turn) {
        self.history.push(turn);
    }

    /// Returns the number of completed model iterations.
    #[must_use]
    pub const fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Counts one model iteration.
    pub fn bump_iteration(&mut self) {
        self.iteration += 1;
    }

    /// Records a failure for the named tool and returns the new
    /// consecutive-failure count.
    pub fn record_failure(&mut self, name: &str) -> u32 {
        let count = self.failure_counts.entry(name.to_owned()).or_insert(0);
        *count += 1;
        *count
    }

    /// Records a success for the named tool, resetting its counter.
    pub fn record_success(&mut self, name: &str) {
        self.failure_counts.insert(name.to_owned(), 0);
    }
}
