//! In-memory `Store`, for tests and examples that don't need cross-process
//! persistence: `Arc<RwLock<HashMap<...>>>` per table, no disk I/O.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stream_event::Envelope;
use tokio::sync::RwLock;

use crate::error::ShuttleError;
use crate::model::{Run, RunState, Step};

use super::{is_monotonic_transition, Store};

#[derive(Default)]
pub struct InMemoryStore {
    runs: Arc<RwLock<HashMap<String, Run>>>,
    steps: Arc<RwLock<HashMap<String, Vec<Step>>>>,
    events: Arc<RwLock<HashMap<String, Vec<Envelope>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_run(&self, run: Run) -> Result<(), ShuttleError> {
        self.runs.write().await.insert(run.run_id.clone(), run);
        Ok(())
    }

    async fn set_run_state(
        &self,
        run_id: &str,
        state: RunState,
        ended_at: Option<i64>,
    ) -> Result<(), ShuttleError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| ShuttleError::NodeNotFound(run_id.to_string()))?;
        if !is_monotonic_transition(run.state, state) {
            return Err(ShuttleError::NonMonotonicTransition {
                from: run.state,
                to: state,
            });
        }
        run.state = state;
        if let Some(ended_at) = ended_at {
            run.ended_at = Some(ended_at);
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, ShuttleError> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn update_run_totals(
        &self,
        run_id: &str,
        total_tokens: u64,
        total_cost_usd: f64,
    ) -> Result<(), ShuttleError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| ShuttleError::NodeNotFound(run_id.to_string()))?;
        run.total_tokens = total_tokens;
        run.total_cost_usd = total_cost_usd;
        Ok(())
    }

    async fn set_run_output(&self, run_id: &str, output: serde_json::Value) -> Result<(), ShuttleError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| ShuttleError::NodeNotFound(run_id.to_string()))?;
        run.output = Some(output);
        Ok(())
    }

    async fn append_step(&self, mut step: Step) -> Result<u64, ShuttleError> {
        let mut steps = self.steps.write().await;
        let run_steps = steps.entry(step.run_id.clone()).or_default();
        let index = run_steps.len() as u64 + 1;
        step.index = index;
        run_steps.push(step);
        Ok(index)
    }

    async fn update_step(&self, step: Step) -> Result<(), ShuttleError> {
        let mut steps = self.steps.write().await;
        let run_steps = steps
            .get_mut(&step.run_id)
            .ok_or_else(|| ShuttleError::NodeNotFound(step.run_id.clone()))?;
        let existing = run_steps
            .iter_mut()
            .find(|s| s.step_id == step.step_id)
            .ok_or_else(|| ShuttleError::NodeNotFound(step.step_id.clone()))?;
        *existing = step;
        Ok(())
    }

    async fn list_runs(&self) -> Result<Vec<Run>, ShuttleError> {
        let mut runs: Vec<Run> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn list_steps(&self, run_id: &str) -> Result<Vec<Step>, ShuttleError> {
        Ok(self.steps.read().await.get(run_id).cloned().unwrap_or_default())
    }

    async fn append_event(&self, envelope: Envelope) -> Result<(), ShuttleError> {
        self.events
            .write()
            .await
            .entry(envelope.run_id.clone())
            .or_default()
            .push(envelope);
        Ok(())
    }

    async fn list_events(&self, run_id: &str) -> Result<Vec<Envelope>, ShuttleError> {
        Ok(self.events.read().await.get(run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
        let store = InMemoryStore::new();
        store.create_run(sample_run("r1")).await.unwrap();
        let run = store.get_run("r1").await.unwrap().unwrap();
        assert_eq!(run.run_id, "r1");
    }

    #[tokio::test]
    async fn non_monotonic_transition_is_rejected() {
        let store = InMemoryStore::new();
        store.create_run(sample_run("r1")).await.unwrap();
        store
            .set_run_state("r1", RunState::Running, None)
            .await
            .unwrap();
        store
            .set_run_state("r1", RunState::Failed, Some(10))
            .await
            .unwrap();
        let err = store.set_run_state("r1", RunState::Running, None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn append_step_assigns_increasing_index() {
        let store = InMemoryStore::new();
        store.create_run(sample_run("r1")).await.unwrap();
        let step = |id: &str| Step {
            step_id: id.to_string(),
            run_id: "r1".to_string(),
            node_id: "n1".to_string(),
            index: 0,
            status: crate::model::StepStatus::Success,
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
        assert_eq!(store.append_step(step("s1")).await.unwrap(), 1);
        assert_eq!(store.append_step(step("s2")).await.unwrap(), 2);
    }
}
