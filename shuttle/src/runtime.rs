//! `GraphRuntime`: the top-level scheduler. Builds a
//! topological frontier over the DAG, threads `NodeContext` between nodes,
//! drives the Run state machine, and supports cancellation and fork/replay.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use stream_event::{Envelope, EnvelopeState, EventPayload};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ShuttleError;
use crate::events::EventBus;
use crate::logging;
use crate::model::{GraphDefinition, NodeContext, NodeDefinition, Run, RunState, Step, StepStatus};
use crate::runner::GraphNodeRunner;
use crate::store::Store;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct Topology<'a> {
    predecessors: HashMap<&'a str, Vec<&'a str>>,
    successors: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> Topology<'a> {
    fn build(graph: &'a GraphDefinition) -> Self {
        let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        for n in &graph.nodes {
            predecessors.entry(n.id.as_str()).or_default();
            successors.entry(n.id.as_str()).or_default();
        }
        for e in &graph.edges {
            predecessors.entry(e.target.as_str()).or_default().push(e.source.as_str());
            successors.entry(e.source.as_str()).or_default().push(e.target.as_str());
        }
        Self {
            predecessors,
            successors,
        }
    }

    fn entry(&self, graph: &'a GraphDefinition) -> &'a str {
        graph
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .find(|id| self.predecessors.get(id).map(|p| p.is_empty()).unwrap_or(true))
            .expect("validated graph has exactly one entry node")
    }

    fn is_terminal(&self, node_id: &str) -> bool {
        self.successors.get(node_id).map(|s| s.is_empty()).unwrap_or(true)
    }
}

/// Per-run bookkeeping the runtime needs to support `cancelRun` and to drain
/// the internal event channel into the `EventBus`.
struct RunHandle {
    cancel_token: CancellationToken,
}

pub struct GraphRuntime {
    store: Arc<dyn Store>,
    runner: Arc<GraphNodeRunner>,
    event_bus: Arc<EventBus>,
    runs: Mutex<HashMap<String, RunHandle>>,
}

impl GraphRuntime {
    pub fn new(store: Arc<dyn Store>, runner: Arc<GraphNodeRunner>, event_bus: Arc<EventBus>) -> Self {
        Self {
            store,
            runner,
            event_bus,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> crate::events::EventSubscription {
        self.event_bus.subscribe()
    }

    /// `cancelRun`: atomically flips the per-run cancel token. In-flight
    /// executors observe this at their next suspension point.
    pub fn cancel_run(&self, run_id: &str) -> Result<(), ShuttleError> {
        let runs = self.runs.lock().unwrap();
        match runs.get(run_id) {
            Some(handle) => {
                handle.cancel_token.cancel();
                Ok(())
            }
            None => Err(ShuttleError::NodeNotFound(run_id.to_string())),
        }
    }

    /// `startRun`: validates the graph, creates the Run row, and drives it
    /// to completion. Returns once the Run reaches a terminal state; callers
    /// that want `runId` immediately should `tokio::spawn` this themselves
    /// and subscribe to the `EventBus` for progress.
    pub async fn start_run(&self, graph: &GraphDefinition, input: Value) -> Result<String, ShuttleError> {
        graph.validate()?;
        let run_id = Uuid::new_v4().to_string();
        let cancel_token = CancellationToken::new();
        self.runs.lock().unwrap().insert(
            run_id.clone(),
            RunHandle {
                cancel_token: cancel_token.clone(),
            },
        );

        let run = Run {
            run_id: run_id.clone(),
            graph_hash: graph.hash(),
            state: RunState::Running,
            started_at: now_ms(),
            ended_at: None,
            total_tokens: 0,
            total_cost_usd: 0.0,
            global_input: input.clone(),
            output: None,
            parent_run_id: None,
            fork_from_step_id: None,
        };
        self.store.create_run(run).await?;
        logging::log_run_start(&run_id, &graph.hash());

        let mut envelope_state = EnvelopeState::new(run_id.clone());
        self.publish(&mut envelope_state, EventPayload::RunStarted {
            graph_hash: graph.hash(),
        }).await;

        let run_memory = Arc::new(RwLock::new(HashMap::new()));
        let outcome = self
            .drive(graph, &run_id, input, Value::Null, HashMap::new(), run_memory, cancel_token.clone(), &mut envelope_state)
            .await;

        self.runs.lock().unwrap().remove(&run_id);
        self.finalize(&run_id, outcome, &mut envelope_state).await?;
        Ok(run_id)
    }

    /// `forkRun`: re-executes `fromStepId`'s node and
    /// everything downstream against a fresh Run, seeding `runMemory` and
    /// upstream outputs from the parent's Steps.
    pub async fn fork_run(
        &self,
        parent_run_id: &str,
        from_step_id: &str,
        graph: &GraphDefinition,
        input_override: Option<Value>,
    ) -> Result<String, ShuttleError> {
        graph.validate()?;
        let parent_run = self
            .store
            .get_run(parent_run_id)
            .await?
            .ok_or_else(|| ShuttleError::NodeNotFound(parent_run_id.to_string()))?;
        let parent_steps = self.store.list_steps(parent_run_id).await?;
        let fork_step = parent_steps
            .iter()
            .find(|s| s.step_id == from_step_id)
            .ok_or_else(|| ShuttleError::NodeNotFound(from_step_id.to_string()))?
            .clone();

        let run_id = Uuid::new_v4().to_string();
        let cancel_token = CancellationToken::new();
        self.runs.lock().unwrap().insert(
            run_id.clone(),
            RunHandle {
                cancel_token: cancel_token.clone(),
            },
        );

        let global_input = parent_run.global_input.clone();
        let fork_node_input = input_override.unwrap_or_else(|| fork_step.input.clone());

        let run = Run {
            run_id: run_id.clone(),
            graph_hash: graph.hash(),
            state: RunState::Running,
            started_at: now_ms(),
            ended_at: None,
            total_tokens: 0,
            total_cost_usd: 0.0,
            global_input: global_input.clone(),
            output: None,
            parent_run_id: Some(parent_run_id.to_string()),
            fork_from_step_id: Some(from_step_id.to_string()),
        };
        self.store.create_run(run).await?;

        let mut envelope_state = EnvelopeState::new(run_id.clone());
        self.publish(&mut envelope_state, EventPayload::RunStarted {
            graph_hash: graph.hash(),
        }).await;

        // Seed prior outputs (every step before the fork node, in commit
        // order) and mark them SKIPPED/reused in the new Run.
        let mut prior_outputs: HashMap<String, Value> = HashMap::new();
        let mut seen_fork_node = false;
        let run_memory = Arc::new(RwLock::new(HashMap::new()));
        for step in &parent_steps {
            if step.node_id == fork_step.node_id {
                seen_fork_node = true;
                break;
            }
            if let Some(output) = &step.output {
                prior_outputs.insert(step.node_id.clone(), output.clone());
            }
            // Replay MEMORY mutations deterministically so the fork's
            // runMemory matches what the fork node would have observed.
            if let Some(node) = graph.node(&step.node_id) {
                if node.node_type == crate::model::NodeType::Memory {
                    self.replay_memory_step(node, step, &run_memory).await;
                }
            }
            let mut skipped = step.clone();
            skipped.step_id = Uuid::new_v4().to_string();
            skipped.run_id = run_id.clone();
            skipped.status = StepStatus::Skipped;
            skipped.is_rerun = true;
            self.store.append_step(skipped).await?;
        }
        if !seen_fork_node {
            return Err(ShuttleError::NodeNotFound(format!(
                "step {from_step_id} node {} not reached before itself",
                fork_step.node_id
            )));
        }

        let outcome = self
            .drive(
                graph,
                &run_id,
                global_input,
                fork_node_input,
                prior_outputs,
                run_memory,
                cancel_token.clone(),
                &mut envelope_state,
            )
            .await;

        self.runs.lock().unwrap().remove(&run_id);
        self.finalize(&run_id, outcome, &mut envelope_state).await?;
        Ok(run_id)
    }

    async fn replay_memory_step(
        &self,
        node: &NodeDefinition,
        step: &Step,
        run_memory: &Arc<RwLock<HashMap<String, Value>>>,
    ) {
        use crate::executor::{MemoryExecutor, NodeExecutor};
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = NodeContext {
            run_id: step.run_id.clone(),
            node_id: step.node_id.clone(),
            previous_output: step.input.clone(),
            global_input: Value::Null,
            run_memory: run_memory.clone(),
            cancel_token: CancellationToken::new(),
            events: tx,
        };
        let _ = MemoryExecutor.execute(node, &ctx).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        graph: &GraphDefinition,
        run_id: &str,
        global_input: Value,
        entry_previous_output: Value,
        mut completed: HashMap<String, Value>,
        run_memory: Arc<RwLock<HashMap<String, Value>>>,
        cancel_token: CancellationToken,
        envelope_state: &mut EnvelopeState,
    ) -> Result<Value, ShuttleError> {
        let topo = Topology::build(graph);
        let start_node = if completed.is_empty() {
            topo.entry(graph).to_string()
        } else {
            // Fork resumes at the node whose step was the fork point; that
            // node id is implicit in the caller-seeded `completed` map's
            // complement — find the first node all of whose predecessors are
            // already completed but which is not itself completed.
            graph
                .nodes
                .iter()
                .map(|n| n.id.as_str())
                .find(|id| {
                    !completed.contains_key(*id)
                        && topo
                            .predecessors
                            .get(id)
                            .map(|preds| preds.iter().all(|p| completed.contains_key(*p)))
                            .unwrap_or(true)
                })
                .expect("fork point resolves to a ready node")
                .to_string()
        };

        let start_node_id = start_node.clone();
        let mut ready: VecDeque<String> = VecDeque::from([start_node]);
        let mut queued: HashSet<String> = ready.iter().cloned().collect();
        let mut total_tokens = 0u64;
        let mut total_cost = 0.0f64;
        let mut terminal_outputs: HashMap<String, Value> = HashMap::new();

        while let Some(node_id) = ready.pop_front() {
            if cancel_token.is_cancelled() {
                self.publish(envelope_state, EventPayload::RunCancelled).await;
                return Err(ShuttleError::System("cancelled".to_string()));
            }

            let node = graph
                .node(&node_id)
                .ok_or_else(|| ShuttleError::NodeNotFound(node_id.clone()))?;

            // The node this `drive` call starts at takes its previousOutput
            // directly from `entry_previous_output` (the run's true
            // globalInput for a fresh Run, or the fork node's — possibly
            // `inputOverride`-replaced — input for a fork) regardless of how
            // many predecessors it has in the full graph; every other node
            // threads its previousOutput from its predecessors' outputs.
            let previous_output = if node_id == start_node_id {
                entry_previous_output.clone()
            } else {
                let preds = topo.predecessors.get(node_id.as_str()).cloned().unwrap_or_default();
                match preds.len() {
                    0 => entry_previous_output.clone(),
                    1 => completed.get(preds[0]).cloned().unwrap_or(Value::Null),
                    _ => {
                        let mut map = serde_json::Map::new();
                        for p in &preds {
                            if let Some(v) = completed.get(*p) {
                                map.insert((*p).to_string(), v.clone());
                            }
                        }
                        Value::Object(map)
                    }
                }
            };

            let (tx, mut rx) = mpsc::unbounded_channel::<EventPayload>();
            let ctx = NodeContext {
                run_id: run_id.to_string(),
                node_id: node_id.clone(),
                previous_output,
                global_input: global_input.clone(),
                run_memory: run_memory.clone(),
                cancel_token: cancel_token.clone(),
                events: tx,
            };

            let result = self.runner.run(node, &ctx).await;
            while let Ok(payload) = rx.try_recv() {
                self.publish(envelope_state, payload).await;
            }

            match result {
                Ok(node_result) => {
                    total_tokens += node_result.tokens;
                    total_cost += node_result.cost_usd;
                    self.store.update_run_totals(run_id, total_tokens, total_cost).await?;
                    completed.insert(node_id.clone(), node_result.output.clone());
                    if topo.is_terminal(&node_id) {
                        terminal_outputs.insert(node_id.clone(), node_result.output.clone());
                    }
                    for succ in topo.successors.get(node_id.as_str()).cloned().unwrap_or_default() {
                        if completed.contains_key(succ) || queued.contains(succ) {
                            continue;
                        }
                        let preds_ready = topo
                            .predecessors
                            .get(succ)
                            .map(|preds| preds.iter().all(|p| completed.contains_key(*p)))
                            .unwrap_or(true);
                        if preds_ready {
                            ready.push_back(succ.to_string());
                            queued.insert(succ.to_string());
                        }
                    }
                }
                Err(err) => {
                    if err.kind() == crate::error::ErrorKind::SystemError && err.to_string().contains("cancelled") {
                        self.publish(envelope_state, EventPayload::RunCancelled).await;
                    } else {
                        self.publish(envelope_state, EventPayload::RunFailed {
                            node_id: node_id.clone(),
                            error_type: format!("{:?}", err.kind()),
                            error_msg: err.to_string(),
                        }).await;
                    }
                    return Err(err);
                }
            }
        }

        let output = match terminal_outputs.len() {
            0 => Value::Null,
            1 => terminal_outputs.into_values().next().unwrap(),
            _ => Value::Object(terminal_outputs.into_iter().collect()),
        };
        Ok(output)
    }

    async fn finalize(
        &self,
        run_id: &str,
        outcome: Result<Value, ShuttleError>,
        envelope_state: &mut EnvelopeState,
    ) -> Result<(), ShuttleError> {
        match outcome {
            Ok(output) => {
                self.store.set_run_output(run_id, output.clone()).await?;
                self.store
                    .set_run_state(run_id, RunState::Completed, Some(now_ms()))
                    .await?;
                let run = self.store.get_run(run_id).await?;
                let (tokens, cost) = run.map(|r| (r.total_tokens, r.total_cost_usd)).unwrap_or((0, 0.0));
                logging::log_run_complete(run_id, tokens, cost);
                self.publish(envelope_state, EventPayload::RunCompleted {
                    output,
                    total_tokens: tokens,
                    total_cost_usd: cost,
                }).await;
                Ok(())
            }
            Err(err) if err.kind() == crate::error::ErrorKind::SystemError && err.to_string().contains("cancelled") => {
                self.store
                    .set_run_state(run_id, RunState::Cancelled, Some(now_ms()))
                    .await?;
                Ok(())
            }
            Err(err) => {
                logging::log_run_error(run_id, &err);
                self.store
                    .set_run_state(run_id, RunState::Failed, Some(now_ms()))
                    .await?;
                Err(err)
            }
        }
    }

    /// Persists `payload` as the Run's next Event before fanning it out —
    /// durability first, same ordering as a Step's persist-then-emit. A
    /// storage failure here is logged and swallowed rather than propagated:
    /// the Run's own outcome must not hinge on whether its Event log could
    /// be written, only on the Step/Run rows that define its state machine.
    async fn publish(&self, envelope_state: &mut EnvelopeState, payload: EventPayload) {
        let envelope: Envelope = envelope_state.next(payload);
        if let Err(err) = self.store.append_event(envelope.clone()).await {
            tracing::warn!(run_id = %envelope.run_id, ?err, "failed to persist event");
        }
        self.event_bus.publish(envelope);
    }
}
