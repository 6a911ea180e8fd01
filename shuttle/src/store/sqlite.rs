//! SQLite-backed `Store`. Persistent across process restarts; single-node,
//! `spawn_blocking`-wrapped rusqlite per call.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use stream_event::Envelope;

use crate::error::{ErrorKind, ShuttleError};
use crate::model::{Run, RunState, Step, StepStatus};

use super::{is_monotonic_transition, Store};

pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ShuttleError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                graph_hash TEXT NOT NULL,
                state TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                total_cost_usd REAL NOT NULL DEFAULT 0,
                global_input TEXT NOT NULL DEFAULT 'null',
                output TEXT,
                parent_run_id TEXT,
                fork_from_step_id TEXT
            );
            CREATE TABLE IF NOT EXISTS steps (
                step_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                rendered_prompt TEXT,
                tokens INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                error_type TEXT,
                error_msg TEXT,
                is_rerun INTEGER NOT NULL DEFAULT 0,
                cache_hit INTEGER NOT NULL DEFAULT 0,
                started_at INTEGER NOT NULL,
                ended_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS events (
                run_id TEXT NOT NULL,
                event_id INTEGER NOT NULL,
                envelope TEXT NOT NULL,
                PRIMARY KEY (run_id, event_id)
            );
            "#,
        )?;
        Ok(Self { db_path })
    }

    fn open(&self) -> Result<Connection, ShuttleError> {
        Ok(Connection::open(&self.db_path)?)
    }
}

fn run_state_str(s: RunState) -> &'static str {
    match s {
        RunState::Idle => "IDLE",
        RunState::Running => "RUNNING",
        RunState::Paused => "PAUSED",
        RunState::Completed => "COMPLETED",
        RunState::Failed => "FAILED",
        RunState::Cancelled => "CANCELLED",
    }
}

fn run_state_from_str(s: &str) -> Result<RunState, ShuttleError> {
    Ok(match s {
        "IDLE" => RunState::Idle,
        "RUNNING" => RunState::Running,
        "PAUSED" => RunState::Paused,
        "COMPLETED" => RunState::Completed,
        "FAILED" => RunState::Failed,
        "CANCELLED" => RunState::Cancelled,
        other => return Err(ShuttleError::Storage(format!("unknown run state {other}"))),
    })
}

fn step_status_str(s: StepStatus) -> &'static str {
    match s {
        StepStatus::Pending => "PENDING",
        StepStatus::Running => "RUNNING",
        StepStatus::Success => "SUCCESS",
        StepStatus::Error => "ERROR",
        StepStatus::Skipped => "SKIPPED",
    }
}

fn step_status_from_str(s: &str) -> Result<StepStatus, ShuttleError> {
    Ok(match s {
        "PENDING" => StepStatus::Pending,
        "RUNNING" => StepStatus::Running,
        "SUCCESS" => StepStatus::Success,
        "ERROR" => StepStatus::Error,
        "SKIPPED" => StepStatus::Skipped,
        other => return Err(ShuttleError::Storage(format!("unknown step status {other}"))),
    })
}

fn error_kind_str(k: ErrorKind) -> &'static str {
    match k {
        ErrorKind::ProviderError => "PROVIDER_ERROR",
        ErrorKind::ToolError => "TOOL_ERROR",
        ErrorKind::ValidationError => "VALIDATION_ERROR",
        ErrorKind::TimeoutError => "TIMEOUT_ERROR",
        ErrorKind::PermissionError => "PERMISSION_ERROR",
        ErrorKind::SystemError => "SYSTEM_ERROR",
    }
}

fn error_kind_from_str(s: &str) -> Result<ErrorKind, ShuttleError> {
    Ok(match s {
        "PROVIDER_ERROR" => ErrorKind::ProviderError,
        "TOOL_ERROR" => ErrorKind::ToolError,
        "VALIDATION_ERROR" => ErrorKind::ValidationError,
        "TIMEOUT_ERROR" => ErrorKind::TimeoutError,
        "PERMISSION_ERROR" => ErrorKind::PermissionError,
        "SYSTEM_ERROR" => ErrorKind::SystemError,
        other => return Err(ShuttleError::Storage(format!("unknown error kind {other}"))),
    })
}

#[allow(clippy::type_complexity)]
fn row_to_run(
    row: &rusqlite::Row,
) -> rusqlite::Result<(
    String,
    String,
    String,
    i64,
    Option<i64>,
    i64,
    f64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_run(&self, run: Run) -> Result<(), ShuttleError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let output = run.output.as_ref().map(|v| v.to_string());
            conn.execute(
                "INSERT OR REPLACE INTO runs
                 (run_id, graph_hash, state, started_at, ended_at, total_tokens, total_cost_usd, global_input, output, parent_run_id, fork_from_step_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    run.run_id,
                    run.graph_hash,
                    run_state_str(run.state),
                    run.started_at,
                    run.ended_at,
                    run.total_tokens as i64,
                    run.total_cost_usd,
                    run.global_input.to_string(),
                    output,
                    run.parent_run_id,
                    run.fork_from_step_id,
                ],
            )?;
            Ok::<(), ShuttleError>(())
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn set_run_state(
        &self,
        run_id: &str,
        state: RunState,
        ended_at: Option<i64>,
    ) -> Result<(), ShuttleError> {
        let run = self
            .get_run(run_id)
            .await?
            .ok_or_else(|| ShuttleError::NodeNotFound(run_id.to_string()))?;
        if !is_monotonic_transition(run.state, state) {
            return Err(ShuttleError::NonMonotonicTransition {
                from: run.state,
                to: state,
            });
        }
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute(
                "UPDATE runs SET state = ?1, ended_at = COALESCE(?2, ended_at) WHERE run_id = ?3",
                params![run_state_str(state), ended_at, run_id],
            )?;
            Ok::<(), ShuttleError>(())
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, ShuttleError> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let row = conn
                .query_row(
                    "SELECT run_id, graph_hash, state, started_at, ended_at, total_tokens, total_cost_usd, global_input, output, parent_run_id, fork_from_step_id
                     FROM runs WHERE run_id = ?1",
                    params![run_id],
                    row_to_run,
                )
                .optional()?;
            let Some((run_id, graph_hash, state, started_at, ended_at, total_tokens, total_cost_usd, global_input, output, parent_run_id, fork_from_step_id)) = row else {
                return Ok::<_, ShuttleError>(None);
            };
            Ok(Some(Run {
                run_id,
                graph_hash,
                state: run_state_from_str(&state)?,
                started_at,
                ended_at,
                total_tokens: total_tokens as u64,
                total_cost_usd,
                global_input: serde_json::from_str(&global_input)?,
                output: output.map(|s| serde_json::from_str(&s)).transpose()?,
                parent_run_id,
                fork_from_step_id,
            }))
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))?
    }

    async fn update_run_totals(
        &self,
        run_id: &str,
        total_tokens: u64,
        total_cost_usd: f64,
    ) -> Result<(), ShuttleError> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute(
                "UPDATE runs SET total_tokens = ?1, total_cost_usd = ?2 WHERE run_id = ?3",
                params![total_tokens as i64, total_cost_usd, run_id],
            )?;
            Ok::<(), ShuttleError>(())
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn set_run_output(&self, run_id: &str, output: serde_json::Value) -> Result<(), ShuttleError> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        let output = output.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute(
                "UPDATE runs SET output = ?1 WHERE run_id = ?2",
                params![output, run_id],
            )?;
            Ok::<(), ShuttleError>(())
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn append_step(&self, step: Step) -> Result<u64, ShuttleError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path)?;
            let tx = conn.transaction()?;
            let next_idx: i64 = tx.query_row(
                "SELECT COALESCE(MAX(idx), 0) + 1 FROM steps WHERE run_id = ?1",
                params![step.run_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO steps
                 (step_id, run_id, node_id, idx, status, input, output, rendered_prompt, tokens, cost_usd, duration_ms, error_type, error_msg, is_rerun, cache_hit, started_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    step.step_id,
                    step.run_id,
                    step.node_id,
                    next_idx,
                    step_status_str(step.status),
                    step.input.to_string(),
                    step.output.as_ref().map(|v| v.to_string()),
                    step.rendered_prompt,
                    step.tokens as i64,
                    step.cost_usd,
                    step.duration_ms as i64,
                    step.error_type.map(error_kind_str),
                    step.error_msg,
                    step.is_rerun as i64,
                    step.cache_hit as i64,
                    step.started_at,
                    step.ended_at,
                ],
            )?;
            tx.commit()?;
            Ok::<u64, ShuttleError>(next_idx as u64)
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))?
    }

    async fn update_step(&self, step: Step) -> Result<(), ShuttleError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute(
                "UPDATE steps SET status = ?1, output = ?2, tokens = ?3, cost_usd = ?4, duration_ms = ?5,
                 error_type = ?6, error_msg = ?7, cache_hit = ?8, ended_at = ?9
                 WHERE step_id = ?10",
                params![
                    step_status_str(step.status),
                    step.output.as_ref().map(|v| v.to_string()),
                    step.tokens as i64,
                    step.cost_usd,
                    step.duration_ms as i64,
                    step.error_type.map(error_kind_str),
                    step.error_msg,
                    step.cache_hit as i64,
                    step.ended_at,
                    step.step_id,
                ],
            )?;
            Ok::<(), ShuttleError>(())
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn list_runs(&self) -> Result<Vec<Run>, ShuttleError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT run_id, graph_hash, state, started_at, ended_at, total_tokens, total_cost_usd, global_input, output, parent_run_id, fork_from_step_id
                 FROM runs ORDER BY started_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_run)?;
            let mut out = Vec::new();
            for row in rows {
                let (run_id, graph_hash, state, started_at, ended_at, total_tokens, total_cost_usd, global_input, output, parent_run_id, fork_from_step_id) = row?;
                out.push(Run {
                    run_id,
                    graph_hash,
                    state: run_state_from_str(&state)?,
                    started_at,
                    ended_at,
                    total_tokens: total_tokens as u64,
                    total_cost_usd,
                    global_input: serde_json::from_str(&global_input)?,
                    output: output.map(|s| serde_json::from_str(&s)).transpose()?,
                    parent_run_id,
                    fork_from_step_id,
                });
            }
            Ok::<_, ShuttleError>(out)
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))?
    }

    async fn list_steps(&self, run_id: &str) -> Result<Vec<Step>, ShuttleError> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT step_id, run_id, node_id, idx, status, input, output, rendered_prompt, tokens, cost_usd, duration_ms, error_type, error_msg, is_rerun, cache_hit, started_at, ended_at
                 FROM steps WHERE run_id = ?1 ORDER BY idx ASC",
            )?;
            let rows = stmt.query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, f64>(9)?,
                    row.get::<_, i64>(10)?,
                    row.get::<_, Option<String>>(11)?,
                    row.get::<_, Option<String>>(12)?,
                    row.get::<_, i64>(13)?,
                    row.get::<_, i64>(14)?,
                    row.get::<_, i64>(15)?,
                    row.get::<_, Option<i64>>(16)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (step_id, run_id, node_id, idx, status, input, output, rendered_prompt, tokens, cost_usd, duration_ms, error_type, error_msg, is_rerun, cache_hit, started_at, ended_at) = row?;
                out.push(Step {
                    step_id,
                    run_id,
                    node_id,
                    index: idx as u64,
                    status: step_status_from_str(&status)?,
                    input: serde_json::from_str(&input)?,
                    output: output.map(|s| serde_json::from_str(&s)).transpose()?,
                    rendered_prompt,
                    tokens: tokens as u64,
                    cost_usd,
                    duration_ms: duration_ms as u64,
                    error_type: error_type.map(|s| error_kind_from_str(&s)).transpose()?,
                    error_msg,
                    is_rerun: is_rerun != 0,
                    cache_hit: cache_hit != 0,
                    started_at,
                    ended_at,
                });
            }
            Ok::<_, ShuttleError>(out)
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))?
    }

    async fn append_event(&self, envelope: Envelope) -> Result<(), ShuttleError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let body = serde_json::to_string(&envelope)?;
            conn.execute(
                "INSERT OR REPLACE INTO events (run_id, event_id, envelope) VALUES (?1, ?2, ?3)",
                params![envelope.run_id, envelope.event_id as i64, body],
            )?;
            Ok::<(), ShuttleError>(())
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn list_events(&self, run_id: &str) -> Result<Vec<Envelope>, ShuttleError> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT envelope FROM events WHERE run_id = ?1 ORDER BY event_id ASC",
            )?;
            let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(serde_json::from_str(&row?)?);
            }
            Ok::<_, ShuttleError>(out)
        })
        .await
        .map_err(|e| ShuttleError::Storage(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_event::EventPayload;

    fn sample_run(id: &str) -> Run {
        Run {
            run_id: id.to_string(),
            graph_hash: "h1".to_string(),
            state: RunState::Idle,
            started_at: 1000,
            ended_at: None,
            total_tokens: 0,
            total_cost_usd: 0.0,
            global_input: serde_json::Value::Null,
            output: None,
            parent_run_id: None,
            fork_from_step_id: None,
        }
    }

    #[tokio::test]
    async fn create_and_get_run_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("shuttle.db")).unwrap();
        store.create_run(sample_run("r1")).await.unwrap();
        let run = store.get_run("r1").await.unwrap().unwrap();
        assert_eq!(run.run_id, "r1");
        assert_eq!(run.state, RunState::Idle);
    }

    #[tokio::test]
    async fn set_run_state_enforces_monotonic_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("shuttle.db")).unwrap();
        store.create_run(sample_run("r1")).await.unwrap();
        store.set_run_state("r1", RunState::Running, None).await.unwrap();
        store
            .set_run_state("r1", RunState::Completed, Some(2000))
            .await
            .unwrap();
        let err = store.set_run_state("r1", RunState::Running, None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn append_step_assigns_increasing_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("shuttle.db")).unwrap();
        store.create_run(sample_run("r1")).await.unwrap();
        let step = |id: &str| Step {
            step_id: id.to_string(),
            run_id: "r1".to_string(),
            node_id: "n1".to_string(),
            index: 0,
            status: StepStatus::Success,
            input: serde_json::Value::Null,
            output: None,
            rendered_prompt: None,
            tokens: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            error_type: None,
            error_msg: None,
            is_rerun: false,
            cache_hit: false,
            started_at: 0,
            ended_at: None,
        };
        let idx1 = store.append_step(step("s1")).await.unwrap();
        let idx2 = store.append_step(step("s2")).await.unwrap();
        assert_eq!(idx1, 1);
        assert_eq!(idx2, 2);
    }

    #[tokio::test]
    async fn events_roundtrip_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("shuttle.db")).unwrap();
        let mut state = stream_event::EnvelopeState::new("r1");
        let e1 = state.next(EventPayload::RunStarted {
            graph_hash: "h".to_string(),
        });
        let e2 = state.next(EventPayload::RunCancelled);
        store.append_event(e1).await.unwrap();
        store.append_event(e2).await.unwrap();
        let events = store.list_events("r1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, 1);
        assert_eq!(events[1].event_id, 2);
    }
}
