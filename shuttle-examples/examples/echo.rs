//! Smallest possible graph: `INPUT -> OUTPUT`. Demonstrates wiring an
//! `InMemoryStore`, an `ExecutorRegistry` with just the two pass-through
//! executors, and draining the `EventBus` while a Run drives to completion.
//!
//! Run: `cargo run -p shuttle-examples --example echo -- "hello there"`

use std::env;
use std::sync::Arc;

use serde_json::json;
use shuttle::{
    EventBus, ExecutorRegistry, GraphDefinition, GraphNodeRunner, GraphRuntime, InMemoryCache,
    InMemoryStore, InputExecutor, NodeDefinition, NodeType, OutputExecutor,
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
        edges: vec![shuttle::EdgeDefinition {
            id: "in-out".into(),
            source: "in".into(),
            target: "out".into(),
            condition: None,
            label: None,
        }],
        parallel_groups: vec![],
    }
}

#[tokio::main]
async fn main() {
    let message = env::args().nth(1).unwrap_or_else(|| "hello world".to_string());

    let mut registry = ExecutorRegistry::new();
    registry.register(NodeType::Input, Arc::new(InputExecutor));
    registry.register(NodeType::Output, Arc::new(OutputExecutor));

    let store = Arc::new(InMemoryStore::new());
    let cache: Arc<InMemoryCache<String, serde_json::Value>> = Arc::new(InMemoryCache::new());
    let runner = Arc::new(GraphNodeRunner::new(Arc::new(registry), store.clone(), cache));
    let event_bus = Arc::new(EventBus::new(64));
    let runtime = GraphRuntime::new(store.clone(), runner, event_bus);

    let mut subscription = runtime.subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            let envelope = subscription.recv().await;
            let done = matches!(
                envelope.payload,
                EventPayload::RunCompleted { .. } | EventPayload::RunFailed { .. }
            );
            if let EventPayload::RunCompleted { output, .. } = envelope.payload {
                println!("run completed: {output}");
            }
            if done {
                break;
            }
        }
    });

    let run_id = runtime
        .start_run(&graph(), json!({"message": message}))
        .await
        .expect("run failed");
    println!("run {run_id} finished");

    let _ = watcher.await;
}
