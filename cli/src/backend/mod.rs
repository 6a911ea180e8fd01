//! Runtime construction for the CLI: wires an `ExecutorRegistry` with the
//! stub capability providers plus a `Store`/`Cache`/`EventBus`, the way
//! `main` builds one `GraphRuntime` per invocation.

mod local;

use std::sync::Arc;

use shuttle::{GraphRuntime, Store};

/// Everything a subcommand needs. `list`/`watch` read persisted `Store`
/// state directly since the in-process `runtime` never touches Runs from
/// a different invocation.
pub struct Backend {
    pub runtime: Arc<GraphRuntime>,
    pub store: Arc<dyn Store>,
}
