//! The bounded tool-calling orchestration loop.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use fieldhand_primitives::ConversationId;
use fieldhand_primitives::schema::SchemaDialect;
use fieldhand_providers::{ChatProvider, ToolCall, ToolDeclaration, ToolResult, Turn, wire};
use fieldhand_tools::ToolRegistry;

use crate::conversation::Conversation;
use crate::phase::{LoopEvent, LoopPhase, PhaseTracker};

/// Answer returned when the model finishes without usable text.
const FALLBACK_ANSWER: &str = "Task completed successfully.";

/// Consecutive failures of one tool reported verbatim before the result is
/// replaced with the corrective instruction.
const MAX_RAW_FAILURES: u32 = 2;

/// Tuning knobs for the orchestration loop.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    max_iterations: u32,
    dialect: SchemaDialect,
}

impl OrchestratorConfig {
    /// Returns the iteration budget.
    #[must_use]
    pub const fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Returns the schema dialect tools are translated into.
    #[must_use]
    pub const fn dialect(&self) -> SchemaDialect {
        self.dialect
    }

    /// Overrides the iteration budget.
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Overrides the schema dialect.
    #[must_use]
    pub const fn with_dialect(mut self, dialect: SchemaDialect) -> Self {
        self.dialect = dialect;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            dialect: SchemaDialect::Gemini,
        }
    }
}

/// One executed tool call and the text it produced.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Name of the tool that was invoked.
    pub name: String,
    /// Result text appended to the conversation.
    pub result: String,
}

/// Record of one completed conversation.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    conversation_id: ConversationId,
    answer: String,
    iterations: u32,
    phase: LoopPhase,
    tool_results: Vec<ToolInvocation>,
}

impl ConversationOutcome {
    /// Returns the conversation identifier.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Returns the final answer text.
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Returns the number of model iterations consumed.
    #[must_use]
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Returns the phase the loop finished in.
    #[must_use]
    pub const fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Returns the executed tool calls in dispatch order.
    #[must_use]
    pub fn tool_results(&self) -> &[ToolInvocation] {
        &self.tool_results
    }
}

/// Observer trait used to capture conversation outcomes.
pub trait OutcomeSink: Send + Sync {
    /// Records the outcome of a completed conversation.
    fn record(&self, outcome: ConversationOutcome);
}

/// Sink implementation that logs to tracing.
#[derive(Default)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    fn record(&self, outcome: ConversationOutcome) {
        let tool_names: Vec<&str> = outcome
            .tool_results()
            .iter()
            .map(|invocation| invocation.name.as_str())
            .collect();
        info!(
            conversation_id = %outcome.conversation_id(),
            iterations = outcome.iterations(),
            phase = ?outcome.phase(),
            tools = ?tool_names,
            "conversation completed"
        );
    }
}

/// Sink used during testing to capture outcomes.
#[derive(Default)]
pub struct CollectingSink {
    results: Mutex<Vec<ConversationOutcome>>,
}

impl CollectingSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(Vec::new()),
        })
    }

    /// Returns the collected outcomes.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex has been poisoned by a previous panic.
    #[must_use]
    pub fn drain(&self) -> Vec<ConversationOutcome> {
        let mut lock = self.results.lock().expect("collecting sink poisoned");
        lock.drain(..).collect()
    }
}

impl OutcomeSink for CollectingSink {
    fn record(&self, outcome: ConversationOutcome) {
        self.results
            .lock()
            .expect("collecting sink poisoned")
            .push(outcome);
    }
}

/// Drives one bounded tool-calling conversation per query.
///
/// The orchestrator owns nothing conversation-scoped itself; it can serve
/// any number of queries, concurrently, sharing only the registry.
pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    config: OrchestratorConfig,
    sink: Arc<dyn OutcomeSink>,
}

impl Orchestrator {
    /// Creates an orchestrator over the supplied provider and registry.
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            registry,
            config: OrchestratorConfig::default(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Overrides the loop configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the outcome sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Runs the full conversation loop for one query and returns the final
    /// answer text. Never fails past this boundary: every failure mode maps
    /// to answer text.
    pub async fn process_query(&self, query: &str) -> String {
        let mut conversation = Conversation::new(query);
        let mut tracker = PhaseTracker::new(conversation.id());
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut last_text: Option<String> = None;

        info!(conversation_id = %conversation.id(), "processing query");

        let answer = loop {
            if conversation.iteration() >= self.config.max_iterations {
                warn!(
                    conversation_id = %conversation.id(),
                    budget = self.config.max_iterations,
                    "iteration budget exhausted"
                );
                self.advance(&mut tracker, LoopEvent::BudgetExhausted);
                break last_text
                    .take()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| FALLBACK_ANSWER.to_owned());
            }
            conversation.bump_iteration();

            // Re-snapshot every turn: define_tool may have grown the
            // registry mid-conversation.
            let declarations = self.declarations();

            let response = match self
                .provider
                .complete(conversation.history(), &declarations)
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    error!(
                        conversation_id = %conversation.id(),
                        error = %err,
                        "provider call failed"
                    );
                    self.advance(&mut tracker, LoopEvent::ProviderFailed);
                    break format!("An error occurred: {err}");
                }
            };

            let Some(turn) = response.turn else {
                warn!(conversation_id = %conversation.id(), "provider returned no content");
                self.advance(&mut tracker, LoopEvent::FinalAnswer);
                break FALLBACK_ANSWER.to_owned();
            };

            let calls: Vec<ToolCall> = turn.tool_calls().into_iter().cloned().collect();
            if calls.is_empty() {
                let text = turn
                    .text()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| FALLBACK_ANSWER.to_owned());
                self.advance(&mut tracker, LoopEvent::FinalAnswer);
                break text;
            }

            last_text = turn.text();
            conversation.push_turn(turn);
            self.advance(&mut tracker, LoopEvent::ToolCallsRequested);

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                let text = self.dispatch(&mut conversation, call).await;
                invocations.push(ToolInvocation {
                    name: call.name.clone(),
                    result: text.clone(),
                });
                results.push(ToolResult {
                    name: call.name.clone(),
                    output: json!({ "result": text }),
                });
            }
            conversation.push_turn(Turn::tool_results(results));
            self.advance(&mut tracker, LoopEvent::ResultsAppended);
        };

        self.sink.record(ConversationOutcome {
            conversation_id: conversation.id(),
            answer: answer.clone(),
            iterations: conversation.iteration(),
            phase: tracker.phase(),
            tool_results: invocations,
        });

        answer
    }

    /// Executes one requested tool call and applies the failure policy.
    /// Every failure mode lands in the returned text.
    async fn dispatch(&self, conversation: &mut Conversation, call: &ToolCall) -> String {
        info!(
            conversation_id = %conversation.id(),
            tool = %call.name,
            "dispatching tool call"
        );

        let args = match wire::normalize(call.args.clone()) {
            Value::Object(map) => Some(map),
            Value::Null => Some(Map::new()),
            _ => None,
        };

        let text = match args {
            None => format!(
                "Error: arguments for tool '{}' must be a JSON object.",
                call.name
            ),
            Some(args) => match self.registry.lookup(&call.name) {
                Ok(tool) => tool
                    .invoke(args)
                    .await
                    .unwrap_or_else(|err| format!("Error: tool execution failed: {err}")),
                Err(err) => format!("Error: {err}"),
            },
        };

        if is_failure(&text) {
            let count = conversation.record_failure(&call.name);
            if count > MAX_RAW_FAILURES {
                warn!(tool = %call.name, count, "tool failing repeatedly, escalating");
                return format!(
                    "Error: Tool '{}' failed multiple times. Try a different approach.",
                    call.name
                );
            }
        } else {
            conversation.record_success(&call.name);
        }

        text
    }

    fn declarations(&self) -> Vec<ToolDeclaration> {
        self.registry
            .snapshot()
            .iter()
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_owned(),
                parameters: tool.translated_parameters(self.config.dialect),
            })
            .collect()
    }

    /// Phase transitions are driven solely by this loop; a refused event is
    /// logged and the conversation continues.
    fn advance(&self, tracker: &mut PhaseTracker, event: LoopEvent) {
        if let Err(err) = tracker.transition(event) {
            error!(error = %err, "loop phase refused event");
        }
    }
}

fn is_failure(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("error") || lowered.contains("failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use fieldhand_providers::{
        ModelResponse, Part, ProviderError, ProviderMetadata, ProviderResult,
    };
    use fieldhand_tools::ToolDescriptor;

    /// Provider double that replays a script, then repeats a fixed response.
    struct FakeProvider {
        script: Mutex<VecDeque<Result<ModelResponse, String>>>,
        repeat: Option<ModelResponse>,
        calls: AtomicUsize,
        metadata: ProviderMetadata,
    }

    impl FakeProvider {
        fn scripted(script: Vec<Result<ModelResponse, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                repeat: None,
                calls: AtomicUsize::new(0),
                metadata: ProviderMetadata::new("fake", "scripted"),
            })
        }

        fn repeating(response: ModelResponse) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                repeat: Some(response),
                calls: AtomicUsize::new(0),
                metadata: ProviderMetadata::new("fake", "repeating"),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatProvider for FakeProvider {
        fn metadata(&self) -> &ProviderMetadata {
            &self.metadata
        }

        async fn complete(
            &self,
            _history: &[Turn],
            _tools: &[ToolDeclaration],
        ) -> ProviderResult<ModelResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().expect("script poisoned").pop_front();
            match next {
                Some(Ok(response)) => Ok(response),
                Some(Err(reason)) => Err(ProviderError::transport(reason)),
                None => match &self.repeat {
                    Some(response) => Ok(response.clone()),
                    None => Ok(text_response("done")),
                },
            }
        }
    }

    fn text_response(text: &str) -> ModelResponse {
        ModelResponse {
            turn: Some(Turn::model(vec![Part::Text(text.to_owned())])),
        }
    }

    fn call_response(name: &str, args: Value) -> ModelResponse {
        ModelResponse {
            turn: Some(Turn::model(vec![Part::ToolCall(ToolCall {
                name: name.to_owned(),
                args,
            })])),
        }
    }

    /// Tool double returning scripted texts, counting invocations.
    fn scripted_tool(
        name: &str,
        replies: Vec<&str>,
        counter: Arc<AtomicUsize>,
    ) -> ToolDescriptor {
        let replies: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(
            replies.into_iter().map(str::to_owned).collect(),
        ));
        ToolDescriptor::builder(name)
            .unwrap()
            .description("Scripted test tool.")
            .handler(move |_args: Map<String, Value>| {
                let replies = Arc::clone(&replies);
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let reply = replies
                        .lock()
                        .expect("replies poisoned")
                        .pop_front()
                        .unwrap_or_else(|| "ok".to_owned());
                    Ok(reply)
                }
            })
            .build()
            .unwrap()
    }

    fn harness(
        provider: Arc<FakeProvider>,
        registry: Arc<ToolRegistry>,
    ) -> (Orchestrator, Arc<CollectingSink>) {
        let sink = CollectingSink::new();
        let orchestrator = Orchestrator::new(provider, registry)
            .with_sink(Arc::clone(&sink) as Arc<dyn OutcomeSink>);
        (orchestrator, sink)
    }

    #[tokio::test]
    async fn final_text_returns_verbatim_without_dispatch() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(scripted_tool("echo", vec![], Arc::clone(&invoked)));

        let provider = FakeProvider::scripted(vec![Ok(text_response("All accounts are healthy."))]);
        let (orchestrator, sink) = harness(Arc::clone(&provider), registry);

        let answer = orchestrator.process_query("how are my accounts?").await;
        assert_eq!(answer, "All accounts are healthy.");
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        let outcomes = sink.drain();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].phase(), LoopPhase::Done);
        assert_eq!(outcomes[0].iterations(), 1);
        assert!(outcomes[0].tool_results().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_becomes_result_text() {
        let registry = Arc::new(ToolRegistry::new());
        let provider = FakeProvider::scripted(vec![
            Ok(call_response("ghost", json!({"a": 1}))),
            Ok(text_response("done")),
        ]);
        let (orchestrator, sink) = harness(provider, registry);

        let answer = orchestrator.process_query("use the ghost tool").await;
        assert_eq!(answer, "done");

        let outcomes = sink.drain();
        let results = outcomes[0].tool_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "ghost");
        assert!(results[0].result.contains("not found"));
    }

    #[tokio::test]
    async fn third_consecutive_failure_is_escalated() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(scripted_tool(
            "flaky",
            vec!["Error: boom", "Error: boom", "Error: boom", "Error: boom"],
            Arc::new(AtomicUsize::new(0)),
        ));

        let mut script: Vec<Result<ModelResponse, String>> = (0..4)
            .map(|_| Ok(call_response("flaky", json!({}))))
            .collect();
        script.push(Ok(text_response("giving up")));

        let provider = FakeProvider::scripted(script);
        let (orchestrator, sink) = harness(provider, registry);

        orchestrator.process_query("keep trying").await;

        let outcomes = sink.drain();
        let results = outcomes[0].tool_results();
        assert_eq!(results.len(), 4);
        for raw in &results[..2] {
            assert_eq!(raw.result, "Error: boom");
        }
        // Escalation sticks for every failure past the threshold.
        for escalated in &results[2..] {
            assert_eq!(
                escalated.result,
                "Error: Tool 'flaky' failed multiple times. Try a different approach."
            );
        }
    }

    #[tokio::test]
    async fn success_resets_the_failure_counter() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(scripted_tool(
            "flaky",
            vec!["Error: boom", "Error: boom", "fine", "Error: boom"],
            Arc::new(AtomicUsize::new(0)),
        ));

        let mut script: Vec<Result<ModelResponse, String>> = (0..4)
            .map(|_| Ok(call_response("flaky", json!({}))))
            .collect();
        script.push(Ok(text_response("done")));

        let provider = FakeProvider::scripted(script);
        let (orchestrator, sink) = harness(provider, registry);

        orchestrator.process_query("retry until it works").await;

        let outcomes = sink.drain();
        let results = outcomes[0].tool_results();
        assert_eq!(results[2].result, "fine");
        // Counter restarted after the success, so this is failure #1.
        assert_eq!(results[3].result, "Error: boom");
    }

    #[tokio::test]
    async fn budget_exhaustion_terminates_with_fallback() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(scripted_tool("busy", vec![], Arc::new(AtomicUsize::new(0))));

        let provider = FakeProvider::repeating(call_response("busy", json!({})));
        let (orchestrator, sink) = harness(Arc::clone(&provider), registry);

        let answer = orchestrator.process_query("never stop").await;
        assert_eq!(answer, "Task completed successfully.");
        assert_eq!(provider.calls(), 20);

        let outcomes = sink.drain();
        assert_eq!(outcomes[0].iterations(), 20);
        assert_eq!(outcomes[0].phase(), LoopPhase::Done);
    }

    #[tokio::test]
    async fn provider_failure_aborts_with_error_text() {
        let registry = Arc::new(ToolRegistry::new());
        let provider = FakeProvider::scripted(vec![Err("connection reset".to_owned())]);
        let (orchestrator, sink) = harness(provider, registry);

        let answer = orchestrator.process_query("anything").await;
        assert!(answer.starts_with("An error occurred:"));
        assert!(answer.contains("connection reset"));

        let outcomes = sink.drain();
        assert_eq!(outcomes[0].phase(), LoopPhase::Aborted);
    }

    #[tokio::test]
    async fn empty_candidates_fall_back() {
        let registry = Arc::new(ToolRegistry::new());
        let provider = FakeProvider::scripted(vec![Ok(ModelResponse { turn: None })]);
        let (orchestrator, _sink) = harness(provider, registry);

        let answer = orchestrator.process_query("anything").await;
        assert_eq!(answer, "Task completed successfully.");
    }

    #[tokio::test]
    async fn tagged_arguments_are_normalized_before_dispatch() {
        let registry = Arc::new(ToolRegistry::new());
        let seen: Arc<Mutex<Option<Map<String, Value>>>> = Arc::new(Mutex::new(None));
        let seen_in_handler = Arc::clone(&seen);
        let descriptor = ToolDescriptor::builder("inspect")
            .unwrap()
            .description("Records its arguments.")
            .handler(move |args: Map<String, Value>| {
                let seen = Arc::clone(&seen_in_handler);
                async move {
                    *seen.lock().expect("seen poisoned") = Some(args);
                    Ok("ok".to_owned())
                }
            })
            .build()
            .unwrap();
        registry.register(descriptor);

        let tagged = json!({
            "structValue": {"fields": {"limit": {"numberValue": 5}}}
        });
        let provider = FakeProvider::scripted(vec![
            Ok(call_response("inspect", tagged)),
            Ok(text_response("done")),
        ]);
        let (orchestrator, _sink) = harness(provider, registry);

        orchestrator.process_query("inspect").await;

        let args = seen.lock().expect("seen poisoned").take().expect("invoked");
        assert_eq!(args.get("limit"), Some(&Value::from(5)));
    }
}
