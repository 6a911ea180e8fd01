//! WebSocket connection lifecycle: one reader loop plus one writer task per
//! connection, joined by an `mpsc::UnboundedSender<ServerMessage>` so Events
//! published mid-Run interleave with request/response frames.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::app::AppState;
use crate::protocol::{ClientRequest, ServerMessage};
use crate::run;

pub(crate) async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("failed to serialize server message: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let msg = match frame {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("read error (client closed?): {e}");
                break;
            }
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        dispatch(&state, tx.clone(), &text).await;
    }

    drop(tx);
    let _ = writer.await;
}

async fn dispatch(state: &Arc<AppState>, tx: mpsc::UnboundedSender<ServerMessage>, text: &str) {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            let _ = tx.send(ServerMessage::Error {
                request_id: None,
                error: format!("parse error: {e}"),
            });
            return;
        }
    };

    match request {
        ClientRequest::StartRun { id, graph, input } => {
            let state = state.clone();
            tokio::spawn(run::handle_start_run(state, tx, id, graph, input));
        }
        ClientRequest::ForkRun {
            id,
            parent_run_id,
            from_step_id,
            graph,
            input_override,
        } => {
            let state = state.clone();
            tokio::spawn(run::handle_fork_run(
                state,
                tx,
                id,
                parent_run_id,
                from_step_id,
                graph,
                input_override,
            ));
        }
        ClientRequest::CancelRun { id, run_id } => {
            run::handle_cancel_run(state, &tx, id, run_id);
        }
        ClientRequest::ListRuns { id } => {
            run::handle_list_runs(state, &tx, id).await;
        }
        ClientRequest::Ping { id } => {
            let _ = tx.send(ServerMessage::Pong { request_id: id });
        }
    }
}
