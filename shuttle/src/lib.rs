//! # Shuttle
//!
//! A graph execution runtime for heterogeneous agent nodes: build a
//! [`GraphDefinition`] out of typed nodes (`INPUT`, `OUTPUT`, `LLM`, `TOOL`,
//! `PLANNING`, `REFLECTION`, `MEMORY`, `AGENT_LOOP`), hand it to a
//! [`GraphRuntime`], and drive it to completion while persisting every Step
//! and streaming every Event.
//!
//! ## Design principles
//!
//! - **One executor per node type**: [`NodeExecutor`] implementations are
//!   pure over `(NodeDefinition, NodeContext)`; state mutation is confined to
//!   the `MEMORY` executor and the [`GraphRuntime`] scheduler itself.
//! - **Durable by default**: every attempt produces a [`Step`] through the
//!   [`Store`] trait before the next node becomes eligible; Run state
//!   transitions are validated as monotonic.
//! - **Cache, retry, guardrails**: [`GraphNodeRunner`] wraps each executor
//!   call with a fingerprinted cache lookup, a configurable [`RetryPolicy`],
//!   and a post-execution guardrail check, all visible as the Step's fields.
//! - **Streaming**: every lifecycle transition is published on the
//!   [`EventBus`] as a `stream_event::EventPayload`, independent of
//!   persistence.
//! - **Provider-agnostic**: [`LlmInvoker`] and [`ToolInvoker`] are traits;
//!   this crate ships only deterministic stubs for tests and examples.
//!
//! ## Main modules
//!
//! - [`model`]: [`GraphDefinition`], [`NodeDefinition`], [`Run`], [`Step`],
//!   [`NodeContext`], [`NodeResult`] — the data model.
//! - [`executor`]: [`NodeExecutor`] trait and [`ExecutorRegistry`]; one
//!   implementation per `NodeType` under `executor::*`.
//! - [`runner`]: [`GraphNodeRunner`] — cache/retry/guardrail wrapper around
//!   one executor call.
//! - [`runtime`]: [`GraphRuntime`] — the scheduler; `startRun`/`forkRun`/
//!   `cancelRun` live here.
//! - [`store`]: [`Store`] trait plus [`InMemoryStore`] and [`SqliteStore`].
//! - [`events`]: [`EventBus`] — in-process fan-out of `stream_event::EventPayload`.
//! - [`cache`]: [`Cache`] trait, [`InMemoryCache`], [`fingerprint`].
//! - [`retry`]: [`RetryPolicy`] derived from a node's `RetrySpec`.
//! - [`template`]: [`TemplateRenderer`] for `{{ns.key}}` substitution.
//! - [`llm_invoker`] / [`tool_invoker`]: provider-facing traits plus stubs.
//! - [`error`]: [`ShuttleError`] and the coarse [`ErrorKind`] classification.
//! - [`logging`]: free `tracing` functions for Run/Step lifecycle events.
//!
//! Key types are re-exported at the crate root: `use shuttle::{GraphRuntime, GraphDefinition};`.

pub mod cache;
pub mod error;
pub mod events;
pub mod executor;
pub mod llm_invoker;
pub mod logging;
pub mod model;
pub mod retry;
pub mod runner;
pub mod runtime;
pub mod store;
pub mod template;
pub mod tool_invoker;

pub use cache::{fingerprint, Cache, CacheError, InMemoryCache};
pub use error::{ErrorKind, ShuttleError};
pub use events::{EventBus, EventSubscription};
pub use executor::{
    AgentLoopExecutor, ExecutorRegistry, InputExecutor, LlmLikeExecutor, MemoryExecutor,
    NodeExecutor, OutputExecutor, ToolExecutor,
};
pub use llm_invoker::{LlmInvocation, LlmInvoker, LlmRequest, StubLlmInvoker, StubResponse};
pub use model::{
    AgentLoopNodeConfig, BackoffKind, CacheStrategy, EdgeDefinition, GraphDefinition,
    GuardrailSpec, LlmNodeConfig, NodeContext, NodeDefinition, NodeResult, NodeType,
    ParallelGroup, RetrySpec, Run, RunState, Step, StepStatus, ToolNodeConfig,
};
pub use retry::RetryPolicy;
pub use runner::GraphNodeRunner;
pub use runtime::GraphRuntime;
pub use store::{InMemoryStore, SqliteStore, Store};
pub use template::TemplateRenderer;
pub use tool_invoker::{ScriptedToolInvoker, StubToolInvoker, ToolInvoker, ToolSpec};
