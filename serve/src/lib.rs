//! WebSocket adapter for the graph execution runtime (axum + ws).
//!
//! Exposes `startRun`/`cancelRun`/`forkRun`/`listRuns`/the Event stream over
//! one WebSocket connection per client; see [`protocol::ClientRequest`] and
//! [`protocol::ServerMessage`] for the wire format.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

mod app;
mod connection;
mod protocol;
mod run;

use std::sync::Arc;

use config::{RuntimeConfig, StoreBackend};
use shuttle::{
    AgentLoopExecutor, EventBus, ExecutorRegistry, GraphNodeRunner, GraphRuntime, InMemoryCache,
    InMemoryStore, InputExecutor, LlmLikeExecutor, MemoryExecutor, NodeType, OutputExecutor,
    ShuttleError, SqliteStore, Store, StubLlmInvoker, StubToolInvoker, ToolExecutor,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use app::{router, AppState};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

fn build_state(cfg: &RuntimeConfig) -> Result<Arc<AppState>, ShuttleError> {
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

    Ok(Arc::new(AppState { runtime, store }))
}

/// Runs the server on an existing listener. Used by tests (bind to
/// `127.0.0.1:0`, then pass the listener so the OS picks a free port).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    cfg: &RuntimeConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("shuttle serve listening on ws://{addr}");
    let state = build_state(cfg)?;
    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the server, listening on `addr` (default `127.0.0.1:8080`).
pub async fn run_serve(
    addr: Option<&str>,
    cfg: &RuntimeConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, cfg).await
}
