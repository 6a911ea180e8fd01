//! Wire-level event payloads for a Run's event stream.
//!
//! Mirrors the taxonomy in the runtime spec: run lifecycle, step lifecycle,
//! token/cost accounting, and the inner `AgentStep` trace emitted by the
//! ReAct driver. State-carrying fields use `serde_json::Value` so this crate
//! stays independent of the runtime's internal types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event payload, tagged by `type` (snake_case) per the wire format.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    RunStarted {
        graph_hash: String,
    },
    StepStarted {
        step_id: String,
        node_id: String,
        index: u64,
    },
    StepCompleted {
        step_id: String,
        node_id: String,
        index: u64,
        tokens: u64,
        cost_usd: f64,
        cache_hit: bool,
    },
    StepFailed {
        step_id: String,
        node_id: String,
        index: u64,
        error_type: String,
        error_msg: String,
    },
    RunCompleted {
        output: Value,
        total_tokens: u64,
        total_cost_usd: f64,
    },
    RunFailed {
        node_id: String,
        error_type: String,
        error_msg: String,
    },
    RunCancelled,
    Error {
        node_id: Option<String>,
        error_type: String,
        error_msg: String,
    },
    TokenUpdate {
        step_id: String,
        tokens: u64,
        cost_usd: f64,
    },
    McpCall {
        tool_name: String,
        input: Value,
    },
    /// Inner ReAct iteration trace, for UI visualization only (not persisted
    /// as its own Step; the outer AgentLoop node is one Step).
    AgentStep {
        iteration: u32,
        thought: Option<String>,
        action: Option<String>,
        action_input: Option<Value>,
        observation: Option<Value>,
    },
    /// Emitted by the EventBus when a subscriber's bounded queue overflows.
    DroppedEvents {
        count: u64,
    },
}

impl EventPayload {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Coarse kind string used for dashboards/log filters without matching the enum.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::RunStarted { .. } => "run_started",
            EventPayload::StepStarted { .. } => "step_started",
            EventPayload::StepCompleted { .. } => "step_completed",
            EventPayload::StepFailed { .. } => "step_failed",
            EventPayload::RunCompleted { .. } => "run_completed",
            EventPayload::RunFailed { .. } => "run_failed",
            EventPayload::RunCancelled => "run_cancelled",
            EventPayload::Error { .. } => "error",
            EventPayload::TokenUpdate { .. } => "token_update",
            EventPayload::McpCall { .. } => "mcp_call",
            EventPayload::AgentStep { .. } => "agent_step",
            EventPayload::DroppedEvents { .. } => "dropped_events",
        }
    }
}
