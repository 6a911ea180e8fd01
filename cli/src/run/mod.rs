//! Subcommand implementations: `run`, `cancel`, `fork`, `list`, `watch`.
//! Each takes a [`Backend`] built fresh for this process invocation and
//! prints its result to stdout as one JSON line per event/record, mirroring
//! the `--json` NDJSON convention.

use std::path::Path;

use serde_json::Value;
use shuttle::{GraphDefinition, Store};
use stream_event::EventPayload;

use crate::backend::Backend;
use crate::error::CliError;

pub fn load_graph(path: &Path) -> Result<GraphDefinition, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::ParseJson {
        path: path.display().to_string(),
        source,
    })
}

pub fn parse_input(raw: Option<&str>) -> Result<Value, CliError> {
    match raw {
        Some(s) => Ok(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))),
        None => Ok(Value::Null),
    }
}

fn print_envelope(envelope: &stream_event::Envelope) {
    match serde_json::to_string(envelope) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("failed to serialize event: {e}"),
    }
}

/// `run`: starts a fresh Run and prints every Event as an NDJSON line while
/// it executes, then the final `{run_id, output}` line once it terminates.
pub async fn run_cmd(backend: &Backend, graph: &GraphDefinition, input: Value) -> Result<(), CliError> {
    let mut subscription = backend.runtime.subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            let envelope = subscription.recv().await;
            let done = matches!(
                envelope.payload,
                EventPayload::RunCompleted { .. } | EventPayload::RunFailed { .. } | EventPayload::RunCancelled
            );
            print_envelope(&envelope);
            if done {
                break;
            }
        }
    });

    let result = backend.runtime.start_run(graph, input).await;
    let _ = watcher.await;

    match result {
        Ok(run_id) => {
            println!("{}", serde_json::json!({"run_id": run_id}));
            Ok(())
        }
        Err(e) => Err(CliError::Runtime(e)),
    }
}

/// `cancel`: flips the cancel token for `run_id` in this process's
/// `GraphRuntime`. Cancellation is process-local — `CancellationToken`s
/// live only as long as the `GraphRuntime` that created them — so this only
/// has an effect when something else in the *same* process is concurrently
/// driving that Run. A standalone CLI invocation has nothing in flight, so
/// this will deterministically report "not found"; the subcommand exists to
/// demonstrate the `cancelRun` call, not to act as a cross-process daemon.
pub fn cancel_cmd(backend: &Backend, run_id: &str) -> Result<(), CliError> {
    backend.runtime.cancel_run(run_id)?;
    println!("{}", serde_json::json!({"run_id": run_id, "cancelled": true}));
    Ok(())
}

/// `fork`: replays `parent_run_id` up to `from_step_id` and resumes
/// scheduling from there against a new Run. Unlike `cancel`, this reads the
/// parent's Steps from the durable `Store`, so it works across process
/// invocations whenever the configured `Store` is `Sqlite`.
pub async fn fork_cmd(
    backend: &Backend,
    parent_run_id: &str,
    from_step_id: &str,
    graph: &GraphDefinition,
    input_override: Option<Value>,
) -> Result<(), CliError> {
    let mut subscription = backend.runtime.subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            let envelope = subscription.recv().await;
            let done = matches!(
                envelope.payload,
                EventPayload::RunCompleted { .. } | EventPayload::RunFailed { .. } | EventPayload::RunCancelled
            );
            print_envelope(&envelope);
            if done {
                break;
            }
        }
    });

    let result = backend
        .runtime
        .fork_run(parent_run_id, from_step_id, graph, input_override)
        .await;
    let _ = watcher.await;

    match result {
        Ok(run_id) => {
            println!("{}", serde_json::json!({"run_id": run_id, "parent_run_id": parent_run_id}));
            Ok(())
        }
        Err(e) => Err(CliError::Runtime(e)),
    }
}

/// `list`: prints every persisted Run as one JSON line, most recently
/// started first.
pub async fn list_cmd(backend: &Backend) -> Result<(), CliError> {
    let mut runs = backend.store.list_runs().await?;
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    for run in runs {
        println!("{}", serde_json::to_string(&run)?);
    }
    Ok(())
}

/// `watch`: replays a Run's persisted Event log. Unlike `run`'s live
/// streaming, this reads from the `Store` after the fact, so it works for
/// a Run started by a different invocation as long as events were persisted.
pub async fn watch_cmd(backend: &Backend, run_id: &str) -> Result<(), CliError> {
    let events = backend.store.list_events(run_id).await?;
    for envelope in &events {
        print_envelope(envelope);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::RuntimeConfig;

    fn echo_graph() -> GraphDefinition {
        serde_json::from_value(serde_json::json!({
            "nodes": [
                {"id": "in", "type": "INPUT", "label": "input", "version": 1},
                {"id": "out", "type": "OUTPUT", "label": "output", "version": 1}
            ],
            "edges": [
                {"id": "in-out", "source": "in", "target": "out"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn parse_input_accepts_json_and_falls_back_to_string() {
        assert_eq!(parse_input(Some("{\"a\": 1}")).unwrap(), serde_json::json!({"a": 1}));
        assert_eq!(parse_input(Some("hello")).unwrap(), serde_json::json!("hello"));
        assert_eq!(parse_input(None).unwrap(), Value::Null);
    }

    #[test]
    fn load_graph_reads_and_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(&path, serde_json::to_string(&echo_graph()).unwrap()).unwrap();
        let graph = load_graph(&path).unwrap();
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn load_graph_missing_file_errors() {
        let err = load_graph(Path::new("/nonexistent/graph.json"));
        assert!(matches!(err, Err(CliError::ReadFile { .. })));
    }

    #[tokio::test]
    async fn run_cmd_executes_a_simple_graph() {
        let backend = Backend::build(&RuntimeConfig::default()).unwrap();
        let result = run_cmd(&backend, &echo_graph(), serde_json::json!({"x": 1})).await;
        assert!(result.is_ok());
        let runs = backend.store.list_runs().await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn cancel_cmd_on_idle_process_reports_not_found() {
        let backend = Backend::build(&RuntimeConfig::default()).unwrap();
        let err = cancel_cmd(&backend, "no-such-run");
        assert!(matches!(err, Err(CliError::Runtime(_))));
    }

    #[tokio::test]
    async fn fork_cmd_resumes_from_parent_step() {
        let backend = Backend::build(&RuntimeConfig::default()).unwrap();
        run_cmd(&backend, &echo_graph(), serde_json::json!({"x": 1})).await.unwrap();
        let runs = backend.store.list_runs().await.unwrap();
        let parent_id = &runs[0].run_id;
        let steps = backend.store.list_steps(parent_id).await.unwrap();
        let in_step = steps.iter().find(|s| s.node_id == "in").unwrap();

        let result = fork_cmd(&backend, parent_id, &in_step.step_id, &echo_graph(), None).await;
        assert!(result.is_ok());
        assert_eq!(backend.store.list_runs().await.unwrap().len(), 2);
    }
}
