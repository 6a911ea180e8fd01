//! `TOOL` executor: maps `previousOutput` (optionally
//! filtered by `inputMapping`) to the tool's input, invokes it under a
//! `timeoutMs` deadline the executor enforces itself so every `ToolInvoker`
//! gets the same `TIMEOUT_ERROR` behavior.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ShuttleError;
use crate::model::{NodeContext, NodeDefinition, NodeResult, ToolNodeConfig};
use crate::tool_invoker::ToolInvoker;

use super::NodeExecutor;

pub struct ToolExecutor {
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolExecutor {
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }

    fn map_input(config: &ToolNodeConfig, previous_output: &Value) -> Value {
        match &config.input_mapping {
            None => previous_output.clone(),
            Some(fields) => {
                let mut mapped = serde_json::Map::new();
                if let Value::Object(obj) = previous_output {
                    for field in fields {
                        if let Some(v) = obj.get(field) {
                            mapped.insert(field.clone(), v.clone());
                        }
                    }
                }
                Value::Object(mapped)
            }
        }
    }
}

#[async_trait]
impl NodeExecutor for ToolExecutor {
    async fn execute(&self, node: &NodeDefinition, ctx: &NodeContext) -> Result<NodeResult, ShuttleError> {
        let config = ToolNodeConfig::from_value(&node.config)?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let input = Self::map_input(&config, &ctx.previous_output);
        let output = tokio::select! {
            biased;
            _ = ctx.cancel_token.cancelled() => return Err(ShuttleError::System("cancelled".to_string())),
            result = tokio::time::timeout(
                timeout,
                self.invoker
                    .invoke(&config.tool_name, &config.tool_version, input, timeout),
            ) => result
                .map_err(|_| ShuttleError::Timeout(format!("tool {} exceeded {}ms", config.tool_name, config.timeout_ms)))??,
        };
        Ok(NodeResult {
            output,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CacheStrategy, NodeType};
    use crate::tool_invoker::StubToolInvoker;
    use serde_json::json;

    fn node_with_config(config: Value) -> NodeDefinition {
        NodeDefinition {
            id: "n1".into(),
            node_type: NodeType::Tool,
            label: "n".into(),
            version: 1,
            retry: None,
            guardrails: None,
            cache: CacheStrategy::NoCache,
            config,
            metadata: Default::default(),
        }
    }

    fn ctx(previous_output: Value) -> NodeContext {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        NodeContext {
            run_id: "r1".into(),
            node_id: "n1".into(),
            previous_output,
            global_input: Value::Null,
            run_memory: Default::default(),
            cancel_token: Default::default(),
            events: tx,
        }
    }

    #[tokio::test]
    async fn invokes_tool_and_returns_result() {
        let invoker = Arc::new(StubToolInvoker::get_time_example());
        let exec = ToolExecutor::new(invoker);
        let node = node_with_config(json!({
            "toolName": "get_time",
            "toolVersion": "v1",
            "timeoutMs": 1000,
        }));
        let result = exec.execute(&node, &ctx(Value::Null)).await.unwrap();
        assert_eq!(result.output["time"], "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn input_mapping_filters_fields() {
        let invoker = Arc::new(StubToolInvoker::get_time_example());
        let exec = ToolExecutor::new(invoker);
        let node = node_with_config(json!({
            "toolName": "get_time",
            "toolVersion": "v1",
            "timeoutMs": 1000,
            "inputMapping": ["city"],
        }));
        // mapping is only observable through the invoker's received args in a
        // fuller test double; here we just assert the call still succeeds.
        let result = exec
            .execute(&node, &ctx(json!({"city": "NYC", "other": "ignored"})))
            .await
            .unwrap();
        assert_eq!(result.output["time"], "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn exceeding_timeout_ms_is_a_timeout_error() {
        let invoker = Arc::new(StubToolInvoker::get_time_example().with_delay(Duration::from_millis(50)));
        let exec = ToolExecutor::new(invoker);
        let node = node_with_config(json!({
            "toolName": "get_time",
            "toolVersion": "v1",
            "timeoutMs": 5,
        }));
        let err = exec.execute(&node, &ctx(Value::Null)).await;
        match err {
            Err(ShuttleError::Timeout(_)) => {}
            other => panic!("expected Timeout error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_timeout_ms_is_rejected_at_config_validation() {
        let invoker = Arc::new(StubToolInvoker::get_time_example());
        let exec = ToolExecutor::new(invoker);
        let node = node_with_config(json!({
            "toolName": "get_time",
            "toolVersion": "v1",
            "timeoutMs": 0,
        }));
        let err = exec.execute(&node, &ctx(Value::Null)).await;
        assert!(matches!(err, Err(ShuttleError::Validation(_))));
    }
}
