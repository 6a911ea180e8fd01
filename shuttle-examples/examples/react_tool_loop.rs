//! `INPUT -> AGENT_LOOP -> OUTPUT`: a ReAct driver that calls a `get_time`
//! tool once before producing a final answer. The LLM side is a scripted
//! `StubLlmInvoker` so the two-turn exchange (tool call, then final answer)
//! is deterministic.
//!
//! Run: `cargo run -p shuttle-examples --example react_tool_loop`

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shuttle::{
    AgentLoopExecutor, EdgeDefinition, EventBus, ExecutorRegistry, GraphDefinition, GraphNodeRunner,
    GraphRuntime, InMemoryCache, InMemoryStore, InputExecutor, NodeDefinition, NodeType,
    OutputExecutor, StubLlmInvoker, StubResponse, StubToolInvoker,
};
use stream_event::EventPayload;

fn graph() -> GraphDefinition {
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
                id: "agent".into(),
                node_type: NodeType::AgentLoop,
                label: "agent".into(),
                version: 1,
                retry: None,
                guardrails: None,
                cache: Default::default(),
                config: json!({
                    "systemPrompt": "You are helpful. Use get_time if you need the current time.",
                    "availableTools": ["get_time"],
                    "maxIterations": 5,
                    "maxTokens": 256,
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
    }
}

#[tokio::main]
async fn main() {
    let llm = Arc::new(StubLlmInvoker::new(vec![
        StubResponse::Text {
            text: json!({"toolName": "get_time", "toolInput": {}}).to_string(),
            tokens: 12,
            cost_usd: 0.001,
        },
        StubResponse::Text {
            text: json!({"finalAnswer": "It is currently 2024-01-01T00:00:00Z."}).to_string(),
            tokens: 18,
            cost_usd: 0.002,
        },
    ]));
    let tools = Arc::new(StubToolInvoker::get_time_example());

    let mut registry = ExecutorRegistry::new();
    registry.register(NodeType::Input, Arc::new(InputExecutor));
    registry.register(NodeType::Output, Arc::new(OutputExecutor));
    registry.register(
        NodeType::AgentLoop,
        Arc::new(AgentLoopExecutor::new(llm, tools, Duration::from_secs(5))),
    );

    let store = Arc::new(InMemoryStore::new());
    let cache: Arc<InMemoryCache<String, serde_json::Value>> = Arc::new(InMemoryCache::new());
    let runner = Arc::new(GraphNodeRunner::new(Arc::new(registry), store.clone(), cache));
    let event_bus = Arc::new(EventBus::new(64));
    let runtime = GraphRuntime::new(store.clone(), runner, event_bus);

    let mut subscription = runtime.subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            match subscription.recv().await.payload {
                EventPayload::AgentStep { iteration, action, observation, .. } => {
                    match action {
                        Some(tool) => println!("iteration {iteration}: called {tool}, observed {observation:?}"),
                        None => println!("iteration {iteration}: final answer"),
                    }
                }
                EventPayload::RunCompleted { output, .. } => {
                    println!("run completed: {output}");
                    break;
                }
                EventPayload::RunFailed { error_msg, .. } => {
                    eprintln!("run failed: {error_msg}");
                    break;
                }
                _ => {}
            }
        }
    });

    let input = json!({"goal": "what time is it?"});
    runtime.start_run(&graph(), input).await.expect("run failed");
    let _ = watcher.await;
}
