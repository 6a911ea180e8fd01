//! End-to-end `GraphRuntime` tests, one per Testable Property scenario
//! that isn't already covered by a narrower unit test: run-level retry,
//! cancellation mid-attempt, fork determinism, and agent-loop budget
//! exhaustion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use shuttle::{
    AgentLoopExecutor, EdgeDefinition, EventBus, ExecutorRegistry, GraphDefinition,
    GraphNodeRunner, GraphRuntime, InMemoryCache, InMemoryStore, InputExecutor, LlmInvocation,
    LlmInvoker, LlmLikeExecutor, LlmRequest, NodeDefinition, NodeType, OutputExecutor,
    ShuttleError, StubLlmInvoker, StubResponse, StubToolInvoker,
};

fn linear_graph(llm_config: Value, llm_retry: Option<shuttle::RetrySpec>) -> GraphDefinition {
    GraphDefinition {
        nodes: vec![
            NodeDefinition {
                id: "in".into(),
                node_type: NodeType::Input,
                label: "input".into(),
                version: 1,
                retry: None,
                guardrails: None,
                cache: Default::default(),
                config: json!({}),
                metadata: Default::default(),
            },
            NodeDefinition {
                id: "llm".into(),
                node_type: NodeType::Llm,
                label: "llm".into(),
                version: 1,
                retry: llm_retry,
                guardrails: None,
                cache: Default::default(),
                config: llm_config,
                metadata: Default::default(),
            },
            NodeDefinition {
                id: "out".into(),
                node_type: NodeType::Output,
                label: "output".into(),
                version: 1,
                retry: None,
                guardrails: None,
                cache: Default::default(),
                config: json!({}),
                metadata: Default::default(),
            },
        ],
        edges: vec![
            EdgeDefinition {
                id: "in-llm".into(),
                source: "in".into(),
                target: "llm".into(),
                condition: None,
                label: None,
            },
            EdgeDefinition {
                id: "llm-out".into(),
                source: "llm".into(),
                target: "out".into(),
                condition: None,
                label: None,
            },
        ],
        parallel_groups: vec![],
    }
}

fn runtime_with_llm(invoker: Arc<dyn LlmInvoker>) -> (Arc<InMemoryStore>, GraphRuntime) {
    let mut registry = ExecutorRegistry::new();
    registry.register(NodeType::Input, Arc::new(InputExecutor));
    registry.register(NodeType::Output, Arc::new(OutputExecutor));
    registry.register(NodeType::Llm, Arc::new(LlmLikeExecutor::new(invoker)));
    let store = Arc::new(InMemoryStore::new());
    let cache: Arc<InMemoryCache<String, Value>> = Arc::new(InMemoryCache::new());
    let runner = Arc::new(GraphNodeRunner::new(Arc::new(registry), store.clone(), cache));
    let event_bus = Arc::new(EventBus::new(64));
    let runtime = GraphRuntime::new(store.clone(), runner, event_bus);
    (store, runtime)
}

/// S2: a node-level retry policy retries a transient provider error and
/// eventually succeeds, with one Step persisted per attempt.
#[tokio::test]
async fn s2_run_level_retry_persists_one_step_per_attempt_then_succeeds() {
    let invoker = Arc::new(StubLlmInvoker::new(vec![
        StubResponse::Fail("rate limited".into()),
        StubResponse::Fail("rate limited".into()),
        StubResponse::Text {
            text: "ok".into(),
            tokens: 9,
            cost_usd: 0.01,
        },
    ]));
    let (store, runtime) = runtime_with_llm(invoker);

    let graph = linear_graph(
        json!({"provider": "stub", "model": "stub-1"}),
        Some(shuttle::RetrySpec {
            max_retries: 3,
            backoff: shuttle::BackoffKind::Fixed,
            backoff_base_ms: 1,
            retry_on_error_types: vec![],
        }),
    );

    let run_id = runtime.start_run(&graph, json!("hello")).await.unwrap();
    let run = store.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.state, shuttle::RunState::Completed);
    assert_eq!(run.total_tokens, 9, "only the successful attempt's tokens count");

    let steps = store.list_steps(&run_id).await.unwrap();
    let llm_steps: Vec<_> = steps.iter().filter(|s| s.node_id == "llm").collect();
    assert_eq!(llm_steps.len(), 3, "two failed attempts plus the success");
    assert_eq!(llm_steps[0].status, shuttle::StepStatus::Error);
    assert_eq!(llm_steps[1].status, shuttle::StepStatus::Error);
    assert_eq!(llm_steps[2].status, shuttle::StepStatus::Success);
}

/// A deliberately slow `LlmInvoker` so a test can cancel the Run while an
/// attempt is in flight.
struct DelayedLlmInvoker {
    delay: Duration,
    invoked: AtomicBool,
}

impl DelayedLlmInvoker {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            invoked: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl LlmInvoker for DelayedLlmInvoker {
    async fn invoke(&self, _request: LlmRequest) -> Result<LlmInvocation, ShuttleError> {
        self.invoked.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(LlmInvocation {
            text: "too late".into(),
            tokens: 1,
            cost_usd: 0.0,
            provider_meta: None,
        })
    }
}

/// S3: `cancelRun` fired while the LLM attempt is in flight stops the Run
/// with the in-flight Step recorded as a `SYSTEM_ERROR`, and no Output Step.
#[tokio::test]
async fn s3_cancel_during_in_flight_llm_attempt_yields_cancelled_run() {
    let invoker = Arc::new(DelayedLlmInvoker::new(Duration::from_millis(300)));
    let (store, runtime) = runtime_with_llm(invoker.clone());
    let graph = linear_graph(json!({"provider": "stub", "model": "stub-1"}), None);

    let runtime = Arc::new(runtime);
    let runtime_bg = runtime.clone();
    let graph_bg = graph.clone();
    let handle = tokio::spawn(async move { runtime_bg.start_run(&graph_bg, json!("hello")).await });

    let run_id = loop {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let runs = store.list_runs().await.unwrap();
        if let Some(run) = runs.iter().find(|r| r.state == shuttle::RunState::Running) {
            break run.run_id.clone();
        }
    };
    assert!(invoker.invoked.load(Ordering::SeqCst), "cancel must land mid-attempt");
    runtime.cancel_run(&run_id).unwrap();

    let run_id = handle.await.unwrap().unwrap();
    let run = store.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.state, shuttle::RunState::Cancelled);

    let steps = store.list_steps(&run_id).await.unwrap();
    let llm_step = steps.iter().find(|s| s.node_id == "llm").expect("llm step recorded");
    assert_eq!(llm_step.status, shuttle::StepStatus::Error);
    assert_eq!(llm_step.error_type, Some(shuttle::ErrorKind::SystemError));
    assert!(
        steps.iter().all(|s| s.node_id != "out"),
        "cancellation must prevent the Output step from ever running"
    );

    let events = store.list_events(&run_id).await.unwrap();
    assert!(
        events
            .iter()
            .any(|e| matches!(e.payload, stream_event::EventPayload::RunCancelled)),
        "a run_cancelled event must be persisted"
    );
}

/// S4: forking at a non-entry node carries the parent's `globalInput`
/// forward untouched and applies `inputOverride` only to the fork node's
/// own input, not the whole run.
#[tokio::test]
async fn s4_fork_applies_override_to_fork_node_input_only() {
    let invoker = Arc::new(StubLlmInvoker::fixed("summary", 2, 0.0));
    let (store, runtime) = runtime_with_llm(invoker);
    let graph = linear_graph(json!({"provider": "stub", "model": "stub-1"}), None);

    let parent_input = json!("parent input");
    let parent_run_id = runtime.start_run(&graph, parent_input.clone()).await.unwrap();
    let parent_run = store.get_run(&parent_run_id).await.unwrap().unwrap();
    assert_eq!(parent_run.state, shuttle::RunState::Completed);

    let parent_steps = store.list_steps(&parent_run_id).await.unwrap();
    let llm_step = parent_steps.iter().find(|s| s.node_id == "llm").unwrap();

    let override_input = json!("overridden input");
    let fork_run_id = runtime
        .fork_run(&parent_run_id, &llm_step.step_id, &graph, Some(override_input.clone()))
        .await
        .unwrap();

    let fork_run = store.get_run(&fork_run_id).await.unwrap().unwrap();
    assert_eq!(fork_run.state, shuttle::RunState::Completed);
    assert_eq!(
        fork_run.global_input, parent_input,
        "forkRun must carry the parent's globalInput, not the override"
    );
    assert_eq!(fork_run.parent_run_id.as_deref(), Some(parent_run_id.as_str()));

    let fork_steps = store.list_steps(&fork_run_id).await.unwrap();
    let input_step = fork_steps.iter().find(|s| s.node_id == "in").unwrap();
    assert_eq!(input_step.status, shuttle::StepStatus::Skipped);

    let fork_llm_step = fork_steps.iter().find(|s| s.node_id == "llm" && s.status != shuttle::StepStatus::Skipped).unwrap();
    assert_eq!(
        fork_llm_step.input, override_input,
        "the fork node's own input must reflect inputOverride"
    );
}

/// S6: an `AGENT_LOOP` node that never converges on a `finalAnswer` exhausts
/// its iteration budget with a `TIMEOUT_ERROR`, failing the whole Run.
#[tokio::test]
async fn s6_agent_loop_iteration_budget_exceeded_fails_the_run() {
    let llm = Arc::new(StubLlmInvoker::fixed(
        json!({"toolName": "get_time", "toolInput": {"n": 1}}).to_string(),
        1,
        0.0,
    ));
    // The no-progress guard only trips after two repeated tool calls, and
    // maxIterations=2 exhausts the budget one iteration before that guard
    // would fire — so TIMEOUT_ERROR is the failure cause, not VALIDATION_ERROR.
    let tools = Arc::new(StubToolInvoker::get_time_example().with_call_result(json!({"tick": true})));

    let mut registry = ExecutorRegistry::new();
    registry.register(NodeType::Input, Arc::new(InputExecutor));
    registry.register(NodeType::Output, Arc::new(OutputExecutor));
    registry.register(
        NodeType::AgentLoop,
        Arc::new(AgentLoopExecutor::new(llm, tools, Duration::from_secs(1))),
    );
    let store = Arc::new(InMemoryStore::new());
    let cache: Arc<InMemoryCache<String, Value>> = Arc::new(InMemoryCache::new());
    let runner = Arc::new(GraphNodeRunner::new(Arc::new(registry), store.clone(), cache));
    let event_bus = Arc::new(EventBus::new(64));
    let runtime = GraphRuntime::new(store.clone(), runner, event_bus);

    let graph = GraphDefinition {
        nodes: vec![
            NodeDefinition {
                id: "in".into(),
                node_type: NodeType::Input,
                label: "input".into(),
                version: 1,
                retry: None,
                guardrails: None,
                cache: Default::default(),
                config: json!({}),
                metadata: Default::default(),
            },
            NodeDefinition {
                id: "agent".into(),
                node_type: NodeType::AgentLoop,
                label: "agent".into(),
                version: 1,
                retry: None,
                guardrails: None,
                cache: Default::default(),
                config: json!({
                    "systemPrompt": "You are helpful",
                    "availableTools": ["get_time"],
                    "maxIterations": 2,
                    "maxTokens": 100,
                }),
                metadata: Default::default(),
            },
            NodeDefinition {
                id: "out".into(),
                node_type: NodeType::Output,
                label: "output".into(),
                version: 1,
                retry: None,
                guardrails: None,
                cache: Default::default(),
                config: json!({}),
                metadata: Default::default(),
            },
        ],
        edges: vec![
            EdgeDefinition {
                id: "in-agent".into(),
                source: "in".into(),
                target: "agent".into(),
                condition: None,
                label: None,
            },
            EdgeDefinition {
                id: "agent-out".into(),
                source: "agent".into(),
                target: "out".into(),
                condition: None,
                label: None,
            },
        ],
        parallel_groups: vec![],
    };

    let err = runtime.start_run(&graph, json!({"goal": "never converge"})).await;
    assert!(err.is_err());

    let runs = store.list_runs().await.unwrap();
    let run = runs.last().expect("run was created");
    assert_eq!(run.state, shuttle::RunState::Failed);

    let steps = store.list_steps(&run.run_id).await.unwrap();
    let agent_step = steps.iter().find(|s| s.node_id == "agent").unwrap();
    assert_eq!(agent_step.status, shuttle::StepStatus::Error);
    assert_eq!(agent_step.error_type, Some(shuttle::ErrorKind::TimeoutError));
    assert!(steps.iter().all(|s| s.node_id != "out"), "Output must never run after budget exhaustion");
}
