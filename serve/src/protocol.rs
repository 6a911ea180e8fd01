//! Wire protocol between a WebSocket client and this server: one JSON
//! object per frame, tagged by `type`. Mirrors the Runtime API one-to-one —
//! `startRun`/`cancelRun`/`forkRun`/`listRuns` as requests, Events and the
//! request's own outcome as responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shuttle::{GraphDefinition, Run};
use stream_event::Envelope;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    StartRun {
        id: String,
        graph: GraphDefinition,
        #[serde(default)]
        input: Value,
    },
    CancelRun {
        id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
    ForkRun {
        id: String,
        #[serde(rename = "parentRunId")]
        parent_run_id: String,
        #[serde(rename = "fromStepId")]
        from_step_id: String,
        graph: GraphDefinition,
        #[serde(rename = "inputOverride", default)]
        input_override: Option<Value>,
    },
    ListRuns {
        id: String,
    },
    Ping {
        id: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One Event from the run's stream, forwarded as soon as it is published.
    Event {
        #[serde(rename = "requestId")]
        request_id: String,
        envelope: Envelope,
    },
    RunEnded {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "runId")]
        run_id: String,
        output: Value,
    },
    RunCancelled {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
    RunsList {
        #[serde(rename = "requestId")]
        request_id: String,
        runs: Vec<Run>,
    },
    Pong {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Error {
        #[serde(rename = "requestId")]
        request_id: Option<String>,
        error: String,
    },
}
