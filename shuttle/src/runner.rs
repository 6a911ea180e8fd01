//! `GraphNodeRunner`: wraps one `NodeExecutor` call with cache
//! policy, retry, and guardrails, persisting a Step per attempt.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use stream_event::EventPayload;
use uuid::Uuid;

use crate::cache::{fingerprint, Cache};
use crate::error::ShuttleError;
use crate::executor::ExecutorRegistry;
use crate::logging;
use crate::model::{CacheStrategy, NodeContext, NodeDefinition, NodeResult, Step, StepStatus};
use crate::retry::RetryPolicy;
use crate::store::Store;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct GraphNodeRunner {
    registry: Arc<ExecutorRegistry>,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache<String, Value>>,
}

impl GraphNodeRunner {
    pub fn new(registry: Arc<ExecutorRegistry>, store: Arc<dyn Store>, cache: Arc<dyn Cache<String, Value>>) -> Self {
        Self {
            registry,
            store,
            cache,
        }
    }

    /// Runs `node` once (possibly many attempts under its retry policy),
    /// returning the final `NodeResult` or the last error. Every attempt and
    /// every cache hit is persisted as its own Step; events are pushed
    /// through `ctx.events` for the runtime to forward to the `EventBus`.
    pub async fn run(&self, node: &NodeDefinition, ctx: &NodeContext) -> Result<NodeResult, ShuttleError> {
        let executor = self.registry.lookup(node.node_type)?;
        let retry_policy = node
            .retry
            .as_ref()
            .map(RetryPolicy::from_spec)
            .unwrap_or(RetryPolicy::None);
        let retry_on_error_types = node
            .retry
            .as_ref()
            .map(|r| r.retry_on_error_types.clone())
            .unwrap_or_default();

        let cache_key = node.config.get("promptTemplate").cloned().unwrap_or_else(|| ctx.previous_output.clone());
        let fp = fingerprint(&node.id, node.version, &cache_key);

        if node.cache == CacheStrategy::ReadThrough {
            if let Some(cached) = self.cache.get(&fp).await {
                let step = self.persist_step(node, ctx, StepStatus::Success, Some(cached.clone()), None, 0, 0.0, 0, None, false, true);
                let index = self.store.append_step(step.clone()).await?;
                self.emit(ctx, EventPayload::StepCompleted {
                    step_id: step.step_id,
                    node_id: node.id.clone(),
                    index,
                    tokens: 0,
                    cost_usd: 0.0,
                    cache_hit: true,
                });
                return Ok(NodeResult {
                    output: cached,
                    ..Default::default()
                });
            }
        }

        let mut attempt = 0usize;
        loop {
            let started_at = now_ms();
            logging::log_node_start(&ctx.run_id, &node.id);
            self.emit_step_started(ctx, node, attempt);

            let result = executor.execute(node, ctx).await;
            let duration_ms = (now_ms() - started_at).max(0) as u64;

            match result {
                Ok(node_result) => {
                    if let Some(guardrails) = &node.guardrails {
                        if let Err(violation) = Self::check_guardrails(guardrails, &node_result.output) {
                            let err = ShuttleError::Validation(violation);
                            if self.should_retry(&retry_policy, &retry_on_error_types, &err, attempt) {
                                let step = self.persist_step(
                                    node, ctx, StepStatus::Error, None, Some(&err), duration_ms, 0.0, 0, Some(started_at), attempt > 0,
                                    false,
                                );
                                let index = self.store.append_step(step.clone()).await?;
                                self.emit_step_failed(ctx, node, &step, index, &err);
                                logging::log_node_retry(&ctx.run_id, &node.id, attempt, &err);
                                tokio::time::sleep(retry_policy.delay(attempt)).await;
                                attempt += 1;
                                continue;
                            }
                            let step = self.persist_step(
                                node, ctx, StepStatus::Error, None, Some(&err), duration_ms, 0.0, 0, Some(started_at), attempt > 0,
                                false,
                            );
                            let index = self.store.append_step(step.clone()).await?;
                            self.emit_step_failed(ctx, node, &step, index, &err);
                            return Err(err);
                        }
                    }

                    if node.cache != CacheStrategy::NoCache {
                        self.cache.set(fp.clone(), node_result.output.clone(), None).await.ok();
                    }

                    let step = self.persist_step(
                        node,
                        ctx,
                        StepStatus::Success,
                        Some(node_result.output.clone()),
                        None,
                        duration_ms,
                        node_result.cost_usd,
                        node_result.tokens,
                        Some(started_at),
                        attempt > 0,
                        false,
                    );
                    let step = {
                        let mut step = step;
                        step.rendered_prompt = node_result.rendered_prompt.clone();
                        step
                    };
                    let index = self.store.append_step(step.clone()).await?;
                    logging::log_node_complete(&ctx.run_id, &node.id, StepStatus::Success);
                    self.emit(ctx, EventPayload::StepCompleted {
                        step_id: step.step_id,
                        node_id: node.id.clone(),
                        index,
                        tokens: node_result.tokens,
                        cost_usd: node_result.cost_usd,
                        cache_hit: false,
                    });
                    return Ok(node_result);
                }
                Err(err) => {
                    if self.should_retry(&retry_policy, &retry_on_error_types, &err, attempt) {
                        let step = self.persist_step(
                            node, ctx, StepStatus::Error, None, Some(&err), duration_ms, 0.0, 0, Some(started_at), attempt > 0,
                            false,
                        );
                        let index = self.store.append_step(step.clone()).await?;
                        self.emit_step_failed(ctx, node, &step, index, &err);
                        logging::log_node_retry(&ctx.run_id, &node.id, attempt, &err);
                        tokio::time::sleep(retry_policy.delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let step = self.persist_step(
                        node, ctx, StepStatus::Error, None, Some(&err), duration_ms, 0.0, 0, Some(started_at), attempt > 0,
                        false,
                    );
                    let index = self.store.append_step(step.clone()).await?;
                    self.emit_step_failed(ctx, node, &step, index, &err);
                    logging::log_node_complete(&ctx.run_id, &node.id, StepStatus::Error);
                    return Err(err);
                }
            }
        }
    }

    fn should_retry(
        &self,
        policy: &RetryPolicy,
        allowlist: &[crate::error::ErrorKind],
        err: &ShuttleError,
        attempt: usize,
    ) -> bool {
        policy.should_retry(attempt) && RetryPolicy::allows_kind(err.kind(), allowlist)
    }

    fn check_guardrails(guardrails: &crate::model::GuardrailSpec, output: &Value) -> Result<(), String> {
        if guardrails.expects_object && !output.is_object() {
            return Err("guardrail: expected object output".to_string());
        }
        if let Value::Object(obj) = output {
            for field in &guardrails.required_fields {
                if !obj.contains_key(field) {
                    return Err(format!("guardrail: missing required field {field}"));
                }
            }
        } else if !guardrails.required_fields.is_empty() {
            return Err("guardrail: required fields specified but output is not an object".to_string());
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_step(
        &self,
        node: &NodeDefinition,
        ctx: &NodeContext,
        status: StepStatus,
        output: Option<Value>,
        error: Option<&ShuttleError>,
        duration_ms: u64,
        cost_usd: f64,
        tokens: u64,
        started_at: Option<i64>,
        is_rerun: bool,
        cache_hit: bool,
    ) -> Step {
        Step {
            step_id: Uuid::new_v4().to_string(),
            run_id: ctx.run_id.clone(),
            node_id: node.id.clone(),
            index: 0,
            status,
            input: ctx.previous_output.clone(),
            output,
            rendered_prompt: None,
            tokens,
            cost_usd,
            duration_ms,
            error_type: error.map(|e| e.kind()),
            error_msg: error.map(|e| e.to_string()),
            is_rerun,
            cache_hit,
            started_at: started_at.unwrap_or_else(now_ms),
            ended_at: Some(now_ms()),
        }
    }

    fn emit_step_started(&self, ctx: &NodeContext, node: &NodeDefinition, attempt: usize) {
        let _ = attempt;
        self.emit(ctx, EventPayload::StepStarted {
            step_id: String::new(),
            node_id: node.id.clone(),
            index: 0,
        });
    }

    fn emit_step_failed(&self, ctx: &NodeContext, node: &NodeDefinition, step: &Step, index: u64, err: &ShuttleError) {
        self.emit(ctx, EventPayload::StepFailed {
            step_id: step.step_id.clone(),
            node_id: node.id.clone(),
            index,
            error_type: format!("{:?}", err.kind()),
            error_msg: err.to_string(),
        });
    }

    fn emit(&self, ctx: &NodeContext, payload: EventPayload) {
        let _ = ctx.events.send(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::error::ErrorKind;
    use crate::executor::{InputExecutor, NodeExecutor, OutputExecutor};
    use crate::model::{CacheStrategy, NodeType, RetrySpec};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyExecutor {
        failures_remaining: AtomicUsize,
    }

    #[async_trait]
    impl NodeExecutor for FlakyExecutor {
        async fn execute(&self, _node: &NodeDefinition, _ctx: &NodeContext) -> Result<NodeResult, ShuttleError> {
            if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(ShuttleError::Provider("flaky upstream".to_string()));
            }
            Ok(NodeResult {
                output: json!({"ok": true}),
                ..Default::default()
            })
        }
    }

    fn ctx() -> NodeContext {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        NodeContext {
            run_id: "r1".into(),
            node_id: "n1".into(),
            previous_output: Value::Null,
            global_input: Value::Null,
            run_memory: Default::default(),
            cancel_token: Default::default(),
            events: tx,
        }
    }

    fn node(node_type: NodeType, retry: Option<RetrySpec>, cache: CacheStrategy) -> NodeDefinition {
        NodeDefinition {
            id: "n1".into(),
            node_type,
            label: "n".into(),
            version: 1,
            retry,
            guardrails: None,
            cache,
            config: Value::Null,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn successful_execution_persists_one_step() {
        let mut registry = ExecutorRegistry::new();
        registry.register(NodeType::Input, Arc::new(InputExecutor));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let cache: Arc<dyn Cache<String, Value>> = Arc::new(InMemoryCache::new());
        let runner = GraphNodeRunner::new(Arc::new(registry), store.clone(), cache);

        store
            .create_run(crate::model::Run {
                run_id: "r1".into(),
                graph_hash: "h".into(),
                state: crate::model::RunState::Running,
                started_at: 0,
                ended_at: None,
                total_tokens: 0,
                total_cost_usd: 0.0,
                global_input: Value::Null,
                output: None,
                parent_run_id: None,
                fork_from_step_id: None,
            })
            .await
            .unwrap();

        let result = runner.run(&node(NodeType::Input, None, CacheStrategy::NoCache), &ctx()).await.unwrap();
        assert_eq!(result.output, Value::Null);
        let steps = store.list_steps("r1").await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn retries_transient_error_until_success() {
        let mut registry = ExecutorRegistry::new();
        registry.register(
            NodeType::Llm,
            Arc::new(FlakyExecutor {
                failures_remaining: AtomicUsize::new(2),
            }),
        );
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let cache: Arc<dyn Cache<String, Value>> = Arc::new(InMemoryCache::new());
        let runner = GraphNodeRunner::new(Arc::new(registry), store.clone(), cache);
        store
            .create_run(crate::model::Run {
                run_id: "r1".into(),
                graph_hash: "h".into(),
                state: crate::model::RunState::Running,
                started_at: 0,
                ended_at: None,
                total_tokens: 0,
                total_cost_usd: 0.0,
                global_input: Value::Null,
                output: None,
                parent_run_id: None,
                fork_from_step_id: None,
            })
            .await
            .unwrap();

        let retry = RetrySpec {
            max_retries: 3,
            backoff: crate::model::BackoffKind::Fixed,
            backoff_base_ms: 1,
            retry_on_error_types: vec![],
        };
        let result = runner
            .run(&node(NodeType::Llm, Some(retry), CacheStrategy::NoCache), &ctx())
            .await
            .unwrap();
        assert_eq!(result.output, json!({"ok": true}));
        let steps = store.list_steps("r1").await.unwrap();
        assert_eq!(steps.len(), 3, "two failed attempts plus the success");
        assert_eq!(steps[0].status, StepStatus::Error);
        assert_eq!(steps[0].error_type, Some(ErrorKind::ProviderError));
        assert_eq!(steps[2].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn read_through_cache_hit_skips_execution() {
        let mut registry = ExecutorRegistry::new();
        registry.register(NodeType::Output, Arc::new(OutputExecutor));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let cache: Arc<dyn Cache<String, Value>> = Arc::new(InMemoryCache::new());
        let fp = fingerprint("n1", 1, &Value::Null);
        cache.set(fp, json!({"cached": true}), None).await.unwrap();
        let runner = GraphNodeRunner::new(Arc::new(registry), store.clone(), cache);
        store
            .create_run(crate::model::Run {
                run_id: "r1".into(),
                graph_hash: "h".into(),
                state: crate::model::RunState::Running,
                started_at: 0,
                ended_at: None,
                total_tokens: 0,
                total_cost_usd: 0.0,
                global_input: Value::Null,
                output: None,
                parent_run_id: None,
                fork_from_step_id: None,
            })
            .await
            .unwrap();

        let result = runner
            .run(&node(NodeType::Output, None, CacheStrategy::ReadThrough), &ctx())
            .await
            .unwrap();
        assert_eq!(result.output, json!({"cached": true}));
        let steps = store.list_steps("r1").await.unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].cache_hit);
    }
}
