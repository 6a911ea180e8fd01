//! Request handlers: each takes a parsed [`ClientRequest`] variant and an
//! `mpsc::UnboundedSender<ServerMessage>` shared by the whole connection —
//! one task per connection, bridging `EventBus` envelopes and request
//! outcomes alike into outbound JSON frames.

use std::sync::Arc;

use serde_json::Value;
use shuttle::{GraphDefinition, Store};
use stream_event::EventPayload;
use tokio::sync::mpsc;

use crate::app::AppState;
use crate::protocol::ServerMessage;

fn is_terminal(payload: &EventPayload) -> bool {
    matches!(
        payload,
        EventPayload::RunCompleted { .. } | EventPayload::RunFailed { .. } | EventPayload::RunCancelled
    )
}

/// Forwards every Event belonging to the Run this call starts, from the
/// moment the subscription is created (immediately before `start_run`/
/// `fork_run` is called) until that Run's terminal Event. The *first*
/// envelope this fresh subscription observes is assumed to belong to our
/// own Run — true as long as this connection isn't racing another caller's
/// `start_run` between the subscribe and the call, which holds for the
/// single-writer-per-connection usage this adapter is built for.
async fn forward_run_events(
    state: &Arc<AppState>,
    request_id: String,
    tx: mpsc::UnboundedSender<ServerMessage>,
) -> tokio::task::JoinHandle<()> {
    let mut subscription = state.runtime.subscribe();
    tokio::spawn(async move {
        let mut run_id: Option<String> = None;
        loop {
            let envelope = subscription.recv().await;
            match &run_id {
                Some(id) if id != &envelope.run_id => continue,
                None => run_id = Some(envelope.run_id.clone()),
                _ => {}
            }
            let terminal = is_terminal(&envelope.payload);
            let _ = tx.send(ServerMessage::Event {
                request_id: request_id.clone(),
                envelope,
            });
            if terminal {
                break;
            }
        }
    })
}

pub async fn handle_start_run(
    state: Arc<AppState>,
    tx: mpsc::UnboundedSender<ServerMessage>,
    id: String,
    graph: GraphDefinition,
    input: Value,
) {
    let forward = forward_run_events(&state, id.clone(), tx.clone()).await;
    let result = state.runtime.start_run(&graph, input).await;
    let _ = forward.await;

    match result {
        Ok(run_id) => {
            let output = state
                .store
                .get_run(&run_id)
                .await
                .ok()
                .flatten()
                .and_then(|r| r.output)
                .unwrap_or(Value::Null);
            let _ = tx.send(ServerMessage::RunEnded {
                request_id: id,
                run_id,
                output,
            });
        }
        Err(e) => {
            let _ = tx.send(ServerMessage::Error {
                request_id: Some(id),
                error: e.to_string(),
            });
        }
    }
}

pub async fn handle_fork_run(
    state: Arc<AppState>,
    tx: mpsc::UnboundedSender<ServerMessage>,
    id: String,
    parent_run_id: String,
    from_step_id: String,
    graph: GraphDefinition,
    input_override: Option<Value>,
) {
    let forward = forward_run_events(&state, id.clone(), tx.clone()).await;
    let result = state
        .runtime
        .fork_run(&parent_run_id, &from_step_id, &graph, input_override)
        .await;
    let _ = forward.await;

    match result {
        Ok(run_id) => {
            let output = state
                .store
                .get_run(&run_id)
                .await
                .ok()
                .flatten()
                .and_then(|r| r.output)
                .unwrap_or(Value::Null);
            let _ = tx.send(ServerMessage::RunEnded {
                request_id: id,
                run_id,
                output,
            });
        }
        Err(e) => {
            let _ = tx.send(ServerMessage::Error {
                request_id: Some(id),
                error: e.to_string(),
            });
        }
    }
}

/// `cancelRun` is process-local: it only affects a Run this same server
/// process is currently driving (see `shuttle::GraphRuntime::cancel_run`).
pub fn handle_cancel_run(state: &Arc<AppState>, tx: &mpsc::UnboundedSender<ServerMessage>, id: String, run_id: String) {
    match state.runtime.cancel_run(&run_id) {
        Ok(()) => {
            let _ = tx.send(ServerMessage::RunCancelled { request_id: id, run_id });
        }
        Err(e) => {
            let _ = tx.send(ServerMessage::Error {
                request_id: Some(id),
                error: e.to_string(),
            });
        }
    }
}

pub async fn handle_list_runs(state: &Arc<AppState>, tx: &mpsc::UnboundedSender<ServerMessage>, id: String) {
    match state.store.list_runs().await {
        Ok(mut runs) => {
            runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            let _ = tx.send(ServerMessage::RunsList { request_id: id, runs });
        }
        Err(e) => {
            let _ = tx.send(ServerMessage::Error {
                request_id: Some(id),
                error: e.to_string(),
            });
        }
    }
}
