//! Builds a [`Backend`] from a resolved `config::RuntimeConfig`: a concrete
//! `Store`, deterministic stub `LlmInvoker`/`ToolInvoker` (no real provider
//! adapters are in scope here), and an `ExecutorRegistry` covering every
//! `NodeType`.

use std::sync::Arc;
use std::time::Duration;

use config::{RuntimeConfig, StoreBackend};
use shuttle::{
    AgentLoopExecutor, EventBus, ExecutorRegistry, GraphNodeRunner, GraphRuntime, InMemoryCache,
    InMemoryStore, InputExecutor, LlmLikeExecutor, MemoryExecutor, NodeType, OutputExecutor,
    ShuttleError, SqliteStore, Store, StubLlmInvoker, StubToolInvoker, ToolExecutor,
};

use super::Backend;

impl Backend {
    /// Every CLI invocation builds its own `Backend` and its own
    /// `GraphRuntime`: in-flight cancellation is process-local (see the doc
    /// comment on `run::cancel_cmd`), while `Store` state persists across
    /// processes when `StoreBackend::Sqlite` is configured.
    pub fn build(cfg: &RuntimeConfig) -> Result<Self, ShuttleError> {
        let store: Arc<dyn Store> = match &cfg.store {
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
            StoreBackend::Sqlite { path } => Arc::new(SqliteStore::new(path)?),
        };

        let mut registry = ExecutorRegistry::new();
        registry.register(NodeType::Input, Arc::new(InputExecutor));
        registry.register(NodeType::Output, Arc::new(OutputExecutor));
        registry.register(NodeType::Memory, Arc::new(MemoryExecutor));

        let llm = Arc::new(StubLlmInvoker::fixed(
            "stub response: no provider adapter is configured",
            0,
            0.0,
        ));
        registry.register(NodeType::Llm, Arc::new(LlmLikeExecutor::new(llm.clone())));
        registry.register(NodeType::Planning, Arc::new(LlmLikeExecutor::new(llm.clone())));
        registry.register(NodeType::Reflection, Arc::new(LlmLikeExecutor::new(llm.clone())));

        let tools = Arc::new(StubToolInvoker::get_time_example());
        registry.register(NodeType::Tool, Arc::new(ToolExecutor::new(tools.clone())));
        registry.register(
            NodeType::AgentLoop,
            Arc::new(AgentLoopExecutor::new(llm, tools, Duration::from_secs(30))),
        );

        let cache: Arc<InMemoryCache<String, serde_json::Value>> = Arc::new(InMemoryCache::new());
        let runner = Arc::new(GraphNodeRunner::new(Arc::new(registry), store.clone(), cache));
        let event_bus = Arc::new(EventBus::new(cfg.event_queue_capacity));
        let runtime = Arc::new(GraphRuntime::new(store.clone(), runner, event_bus));

        Ok(Self { runtime, store })
    }
}
