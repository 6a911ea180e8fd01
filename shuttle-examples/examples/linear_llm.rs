//! `INPUT -> LLM -> OUTPUT`: renders a prompt template against `globalInput`
//! and runs it through a deterministic `StubLlmInvoker` standing in for a
//! real model provider.
//!
//! Run: `cargo run -p shuttle-examples --example linear_llm`

use std::sync::Arc;

use serde_json::json;
use shuttle::{
    EdgeDefinition, EventBus, ExecutorRegistry, GraphDefinition, GraphNodeRunner, GraphRuntime,
    InMemoryCache, InMemoryStore, InputExecutor, LlmLikeExecutor, NodeDefinition, NodeType,
    OutputExecutor, StubLlmInvoker,
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
            "Three bullet points about rust ownership.",
            42,
            0.002,
        )))),
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
                EventPayload::StepCompleted { node_id, tokens, .. } => {
                    println!("step completed: {node_id} ({tokens} tokens)");
                }
                EventPayload::RunCompleted { output, total_tokens, .. } => {
                    println!("run completed, {total_tokens} tokens total: {output}");
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

    let input = json!({"audience": "a beginner", "text": "ownership, borrowing, and lifetimes"});
    runtime.start_run(&graph(), input).await.expect("run failed");
    let _ = watcher.await;
}
