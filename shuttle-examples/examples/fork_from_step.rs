//! Runs `INPUT -> LLM -> OUTPUT` to completion, then forks from the `LLM`
//! step with a different `globalInput` to show a fork re-executing only the
//! fork node and everything downstream, while the upstream `INPUT` step is
//! replayed as `SKIPPED` in the child Run.
//!
//! Run: `cargo run -p shuttle-examples --example fork_from_step`

use std::sync::Arc;

use serde_json::json;
use shuttle::{
    EdgeDefinition, EventBus, ExecutorRegistry, GraphDefinition, GraphNodeRunner, GraphRuntime,
    InMemoryCache, InMemoryStore, InputExecutor, LlmLikeExecutor, NodeDefinition, NodeType,
    OutputExecutor, StubLlmInvoker, Store,
};

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
                id: "summarize".into(),
                node_type: NodeType::Llm,
                label: "summarize".into(),
                version: 1,
                retry: None,
                guardrails: None,
                cache: Default::default(),
                config: json!({
                    "provider": "stub",
                    "model": "stub-1",
                    "promptTemplate": "Summarize for {{input.audience}}: {{input.text}}",
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
                id: "in-summarize".into(),
                source: "in".into(),
                target: "summarize".into(),
                condition: None,
                label: None,
            },
            EdgeDefinition {
                id: "summarize-out".into(),
                source: "summarize".into(),
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
    let mut registry = ExecutorRegistry::new();
    registry.register(NodeType::Input, Arc::new(InputExecutor));
    registry.register(NodeType::Output, Arc::new(OutputExecutor));
    registry.register(
        NodeType::Llm,
        Arc::new(LlmLikeExecutor::new(Arc::new(StubLlmInvoker::fixed(
            "Three bullet points.",
            10,
            0.001,
        )))),
    );

    let store = Arc::new(InMemoryStore::new());
    let cache: Arc<InMemoryCache<String, serde_json::Value>> = Arc::new(InMemoryCache::new());
    let runner = Arc::new(GraphNodeRunner::new(Arc::new(registry), store.clone(), cache));
    let event_bus = Arc::new(EventBus::new(64));
    let runtime = GraphRuntime::new(store.clone(), runner, event_bus);

    let input = json!({"audience": "a beginner", "text": "ownership and borrowing"});
    let parent_run_id = runtime.start_run(&graph(), input).await.expect("parent run failed");
    println!("parent run {parent_run_id} completed");

    let parent_steps = store.list_steps(&parent_run_id).await.expect("list steps");
    let llm_step = parent_steps
        .iter()
        .find(|s| s.node_id == "summarize")
        .expect("llm step present");

    let override_input = json!({"audience": "an expert", "text": "ownership and borrowing"});
    let child_run_id = runtime
        .fork_run(&parent_run_id, &llm_step.step_id, &graph(), Some(override_input))
        .await
        .expect("fork run failed");
    println!("forked run {child_run_id} completed");

    let child_steps = store.list_steps(&child_run_id).await.expect("list steps");
    for step in &child_steps {
        println!(
            "  [{}] node={} status={:?} is_rerun={}",
            step.index, step.node_id, step.status, step.is_rerun
        );
    }
}
