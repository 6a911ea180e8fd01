//! `ToolInvoker` capability: the only way the `TOOL` executor
//! and the `AgentLoop` driver reach an external tool. Concrete tool surfaces
//! are out of scope; this crate supplies the trait plus a deterministic stub
//! used by tests and examples.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ShuttleError;

/// Declares one callable tool: name, description, and JSON Schema for its input.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    fn list_tools(&self) -> Vec<ToolSpec>;

    /// The executor enforces `timeoutMs` itself (via `tokio::time::timeout`)
    /// so every invoker, real or stub, gets uniform `TIMEOUT_ERROR` behavior;
    /// `timeout` is passed through only so an invoker can honor it upstream
    /// (e.g. forwarding it to an HTTP client) if it wants to.
    async fn invoke(
        &self,
        tool_name: &str,
        tool_version: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, ShuttleError>;
}

/// A fixed-response stub usable regardless of which tool is called, with an
/// optional artificial delay to exercise timeout/cancellation paths.
pub struct StubToolInvoker {
    tools: Vec<ToolSpec>,
    result: Value,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl StubToolInvoker {
    pub fn new(tools: Vec<ToolSpec>, result: Value) -> Self {
        Self {
            tools,
            result,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// A single `get_time`-style tool returning a fixed payload, for quick
    /// scenario tests that don't care about the tool catalog shape.
    pub fn get_time_example() -> Self {
        Self::new(
            vec![ToolSpec {
                name: "get_time".to_string(),
                description: "returns the current time".to_string(),
                input_schema: Value::Object(serde_json::Map::new()),
            }],
            serde_json::json!({ "time": "2024-01-01T00:00:00Z" }),
        )
    }

    pub fn with_call_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolInvoker for StubToolInvoker {
    fn list_tools(&self) -> Vec<ToolSpec> {
        self.tools.clone()
    }

    async fn invoke(
        &self,
        _tool_name: &str,
        _tool_version: &str,
        _input: Value,
        _timeout: Duration,
    ) -> Result<Value, ShuttleError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.result.clone())
    }
}

/// Per-call-index scripted responses, for tests that need a tool to fail on
/// the first attempt and succeed on a retry.
pub struct ScriptedToolInvoker {
    tools: Vec<ToolSpec>,
    responses: Mutex<HashMap<usize, Result<Value, String>>>,
    call_count: AtomicUsize,
}

impl ScriptedToolInvoker {
    pub fn new(tools: Vec<ToolSpec>, responses: HashMap<usize, Result<Value, String>>) -> Self {
        Self {
            tools,
            responses: Mutex::new(responses),
            call_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ToolInvoker for ScriptedToolInvoker {
    fn list_tools(&self) -> Vec<ToolSpec> {
        self.tools.clone()
    }

    async fn invoke(
        &self,
        _tool_name: &str,
        _tool_version: &str,
        _input: Value,
        _timeout: Duration,
    ) -> Result<Value, ShuttleError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().remove(&idx) {
            Some(Ok(v)) => Ok(v),
            Some(Err(msg)) => Err(ShuttleError::Tool(msg)),
            None => Err(ShuttleError::Tool(format!("no scripted response for call {idx}"))),
        }
    }
}
