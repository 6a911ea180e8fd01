//! The data model: `GraphDefinition`, `Run`, `Step`, `Event`, and the config
//! shapes each `NodeType` accepts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, ShuttleError};

/// Which concrete `NodeExecutor` a node dispatches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Input,
    Output,
    Llm,
    Tool,
    Planning,
    Reflection,
    Memory,
    AgentLoop,
}

/// One node in a `GraphDefinition`. `config` is kept as the original JSON
/// object — the specific `NodeExecutor` validates it into a typed config at
/// lookup time, and the raw value is retained alongside for replay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    pub version: u32,
    #[serde(default)]
    pub retry: Option<RetrySpec>,
    #[serde(default)]
    pub guardrails: Option<GuardrailSpec>,
    #[serde(default)]
    pub cache: CacheStrategy,
    #[serde(default = "default_config")]
    pub config: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_config() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// A set of node ids that become eligible concurrently once every predecessor
/// common to all of them has completed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub id: String,
    #[serde(rename = "nodeIds")]
    pub node_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub nodes: Vec<NodeDefinition>,
    pub edges: Vec<EdgeDefinition>,
    #[serde(default)]
    pub parallel_groups: Vec<ParallelGroup>,
}

impl GraphDefinition {
    /// A stable content hash, recorded on every `Run`.
    pub fn hash(&self) -> String {
        // Node/edge order is part of the author's intent; a simple
        // content-derived hash is enough to detect "same graph, same hash".
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        serde_json::to_string(self)
            .unwrap_or_default()
            .hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Enforces the structural invariants: unique node ids,
    /// edges resolving to real nodes, acyclic (ignoring `AGENT_LOOP`'s own
    /// internal iteration, which this graph representation never encodes as
    /// an edge), exactly one entry node, at least one terminal node.
    pub fn validate(&self) -> Result<(), ShuttleError> {
        let mut seen = HashSet::new();
        for n in &self.nodes {
            if !seen.insert(n.id.as_str()) {
                return Err(ShuttleError::Validation(format!(
                    "duplicate node id: {}",
                    n.id
                )));
            }
        }
        for e in &self.edges {
            if self.node(&e.source).is_none() {
                return Err(ShuttleError::Validation(format!(
                    "edge {} source {} not found",
                    e.id, e.source
                )));
            }
            if self.node(&e.target).is_none() {
                return Err(ShuttleError::Validation(format!(
                    "edge {} target {} not found",
                    e.id, e.target
                )));
            }
        }

        let mut has_incoming: HashSet<&str> = HashSet::new();
        let mut has_outgoing: HashSet<&str> = HashSet::new();
        for e in &self.edges {
            has_incoming.insert(e.target.as_str());
            has_outgoing.insert(e.source.as_str());
        }
        let entries: Vec<&str> = self
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !has_incoming.contains(id))
            .collect();
        if entries.len() != 1 {
            return Err(ShuttleError::Validation(format!(
                "expected exactly one entry node, found {}",
                entries.len()
            )));
        }
        let terminals = self
            .nodes
            .iter()
            .filter(|n| !has_outgoing.contains(n.id.as_str()))
            .count();
        if terminals == 0 {
            return Err(ShuttleError::Validation(
                "graph has no terminal node".to_string(),
            ));
        }

        self.check_acyclic()?;
        Ok(())
    }

    fn check_acyclic(&self) -> Result<(), ShuttleError> {
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
        for e in &self.edges {
            adj.entry(e.source.as_str()).or_default().push(e.target.as_str());
        }
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            node: &'a str,
            adj: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), ShuttleError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(ShuttleError::Validation(format!(
                        "cycle detected through node {}",
                        node
                    )))
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            if let Some(next) = adj.get(node) {
                for n in next {
                    visit(n, adj, marks)?;
                }
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        for n in &self.nodes {
            visit(n.id.as_str(), &adj, &mut marks)?;
        }
        Ok(())
    }
}

/// `NodeDefinition.retry`, carried through to the `GraphNodeRunner`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrySpec {
    #[serde(default)]
    pub max_retries: usize,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub retry_on_error_types: Vec<ErrorKind>,
}

fn default_backoff_base_ms() -> u64 {
    200
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardrailSpec {
    /// JSON Schema-ish shape check, validated by `GraphNodeRunner` after execution.
    pub expects_object: bool,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStrategy {
    #[default]
    NoCache,
    ReadThrough,
    ForceRefresh,
}

/// Shared config for `LLM`/`PLANNING`/`REFLECTION` nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmNodeConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p", rename = "topP")]
    pub top_p: f64,
    #[serde(default, rename = "maxTokens")]
    pub max_tokens: Option<u32>,
    #[serde(default, rename = "systemPrompt")]
    pub system_prompt: Option<String>,
    #[serde(default, rename = "promptTemplate")]
    pub prompt_template: Option<String>,
}

fn default_temperature() -> f64 {
    1.0
}

fn default_top_p() -> f64 {
    1.0
}

impl LlmNodeConfig {
    pub fn from_value(v: &Value) -> Result<Self, ShuttleError> {
        let cfg: Self = serde_json::from_value(v.clone())
            .map_err(|e| ShuttleError::Validation(format!("invalid LLM node config: {e}")))?;
        if !(0.0..=2.0).contains(&cfg.temperature) {
            return Err(ShuttleError::Validation(format!(
                "temperature {} out of range [0,2]",
                cfg.temperature
            )));
        }
        if !(0.0..=1.0).contains(&cfg.top_p) {
            return Err(ShuttleError::Validation(format!(
                "topP {} out of range [0,1]",
                cfg.top_p
            )));
        }
        Ok(cfg)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolNodeConfig {
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(rename = "toolVersion")]
    pub tool_version: String,
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: u64,
    #[serde(default, rename = "inputMapping")]
    pub input_mapping: Option<Vec<String>>,
}

impl ToolNodeConfig {
    pub fn from_value(v: &Value) -> Result<Self, ShuttleError> {
        let cfg: Self = serde_json::from_value(v.clone())
            .map_err(|e| ShuttleError::Validation(format!("invalid tool node config: {e}")))?;
        if cfg.timeout_ms == 0 {
            return Err(ShuttleError::Validation(
                "timeoutMs must be > 0".to_string(),
            ));
        }
        Ok(cfg)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentLoopNodeConfig {
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(default, rename = "availableTools")]
    pub available_tools: Vec<String>,
    #[serde(default = "default_max_iterations", rename = "maxIterations")]
    pub max_iterations: u32,
    #[serde(rename = "maxTokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_max_iterations() -> u32 {
    12
}

impl AgentLoopNodeConfig {
    pub fn from_value(v: &Value) -> Result<Self, ShuttleError> {
        let cfg: Self = serde_json::from_value(v.clone()).map_err(|e| {
            ShuttleError::Validation(format!("invalid agent loop node config: {e}"))
        })?;
        if cfg.max_iterations == 0 {
            return Err(ShuttleError::Validation(
                "maxIterations must be > 0".to_string(),
            ));
        }
        if cfg.max_tokens == 0 {
            return Err(ShuttleError::Validation("maxTokens must be > 0".to_string()));
        }
        Ok(cfg)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub graph_hash: String,
    pub state: RunState,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    /// The `globalInput` this Run was started with — retained so `forkRun`
    /// can recover it without the caller re-supplying it.
    pub global_input: Value,
    pub output: Option<Value>,
    pub parent_run_id: Option<String>,
    pub fork_from_step_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
    Skipped,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub run_id: String,
    pub node_id: String,
    pub index: u64,
    pub status: StepStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub rendered_prompt: Option<String>,
    pub tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub error_type: Option<ErrorKind>,
    pub error_msg: Option<String>,
    pub is_rerun: bool,
    pub cache_hit: bool,
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

/// `NodeContext`, threaded through one node execution. Carries
/// no persistence handles itself — those stay with the `GraphRuntime`. The
/// `run_memory` map is shared across every node in a Run and mutated only by
/// the `MEMORY` executor; `cancel_token` is observed by long-running
/// executors (`TOOL`, `AGENT_LOOP`); `events` lets a node surface a trace
/// event without the runtime persisting it as a Step (e.g. `AgentStep`).
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: String,
    pub node_id: String,
    pub previous_output: Value,
    pub global_input: Value,
    pub run_memory: Arc<RwLock<HashMap<String, Value>>>,
    pub cancel_token: CancellationToken,
    pub events: mpsc::UnboundedSender<stream_event::EventPayload>,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("previous_output", &self.previous_output)
            .field("global_input", &self.global_input)
            .finish_non_exhaustive()
    }
}

/// Result of one `NodeExecutor::execute` call.
#[derive(Clone, Debug, Default)]
pub struct NodeResult {
    pub output: Value,
    pub rendered_prompt: Option<String>,
    pub tokens: u64,
    pub cost_usd: f64,
    pub provider_meta: Option<Value>,
}
