//! `MEMORY` executor: reads/writes named slots in
//! `ctx.runMemory` per config. Output always equals `previousOutput` — this
//! is the one executor allowed to mutate shared Run state, everything else
//! is pure over `(node, ctx)`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ShuttleError;
use crate::model::{NodeContext, NodeDefinition, NodeResult};
use crate::template::TemplateRenderer;

use super::NodeExecutor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryOp {
    Read,
    Write,
    Delete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryNodeConfig {
    pub operation: MemoryOp,
    pub key: String,
    /// Rendered via `{{ns.key}}` substitution against the Run's current
    /// namespaces, then stored verbatim as a JSON string. Required for `WRITE`.
    #[serde(default, rename = "valueTemplate")]
    pub value_template: Option<String>,
}

impl MemoryNodeConfig {
    pub fn from_value(v: &Value) -> Result<Self, ShuttleError> {
        let cfg: Self = serde_json::from_value(v.clone())
            .map_err(|e| ShuttleError::Validation(format!("invalid memory node config: {e}")))?;
        if cfg.operation == MemoryOp::Write && cfg.value_template.is_none() {
            return Err(ShuttleError::Validation(
                "WRITE operation requires valueTemplate".to_string(),
            ));
        }
        Ok(cfg)
    }
}

pub struct MemoryExecutor;

#[async_trait]
impl NodeExecutor for MemoryExecutor {
    async fn execute(&self, node: &NodeDefinition, ctx: &NodeContext) -> Result<NodeResult, ShuttleError> {
        let config = MemoryNodeConfig::from_value(&node.config)?;
        match config.operation {
            MemoryOp::Write => {
                let template = config.value_template.as_deref().unwrap_or_default();
                let rendered = {
                    let run_memory = ctx.run_memory.read().await;
                    TemplateRenderer::render(template, &ctx.global_input, &ctx.previous_output, &run_memory)
                };
                ctx.run_memory
                    .write()
                    .await
                    .insert(config.key, Value::String(rendered));
            }
            MemoryOp::Delete => {
                ctx.run_memory.write().await.remove(&config.key);
            }
            MemoryOp::Read => {
                // No mutation; slot remains readable by later nodes via `{{memory.key}}`.
            }
        }
        Ok(NodeResult {
            output: ctx.previous_output.clone(),
            ..Default::default()
        })
    }
}
