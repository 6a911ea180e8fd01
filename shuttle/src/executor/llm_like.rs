//! Shared executor for `LLM`/`PLANNING`/`REFLECTION`: the
//! three node types differ only in graph role and prompt content, not in
//! mechanism — render `promptTemplate`, invoke the `LlmInvoker`, return text.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ShuttleError;
use crate::llm_invoker::{LlmInvoker, LlmRequest};
use crate::model::{LlmNodeConfig, NodeContext, NodeDefinition, NodeResult};
use crate::template::TemplateRenderer;

use super::NodeExecutor;

pub struct LlmLikeExecutor {
    invoker: Arc<dyn LlmInvoker>,
}

impl LlmLikeExecutor {
    pub fn new(invoker: Arc<dyn LlmInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl NodeExecutor for LlmLikeExecutor {
    async fn execute(&self, node: &NodeDefinition, ctx: &NodeContext) -> Result<NodeResult, ShuttleError> {
        let config = LlmNodeConfig::from_value(&node.config)?;
        let template = config.prompt_template.clone().unwrap_or_default();
        let run_memory = ctx.run_memory.read().await.clone();
        let rendered_prompt = TemplateRenderer::render(
            &template,
            &ctx.global_input,
            &ctx.previous_output,
            &run_memory,
        );
        let invocation = tokio::select! {
            biased;
            _ = ctx.cancel_token.cancelled() => return Err(ShuttleError::System("cancelled".to_string())),
            result = self.invoker.invoke(LlmRequest {
                config,
                rendered_prompt: rendered_prompt.clone(),
                previous_output: ctx.previous_output.clone(),
            }) => result?,
        };
        Ok(NodeResult {
            output: serde_json::Value::String(invocation.text),
            rendered_prompt: Some(rendered_prompt),
            tokens: invocation.tokens,
            cost_usd: invocation.cost_usd,
            provider_meta: invocation.provider_meta,
        })
    }
}
