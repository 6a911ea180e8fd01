//! `INPUT`/`OUTPUT` executors: both pass data through
//! unchanged. `INPUT` seeds a Run's `globalInput`; `OUTPUT` is a terminal
//! node whose `previousOutput` becomes the Run's final `output`.

use async_trait::async_trait;

use crate::error::ShuttleError;
use crate::model::{NodeContext, NodeDefinition, NodeResult};

use super::NodeExecutor;

pub struct InputExecutor;

#[async_trait]
impl NodeExecutor for InputExecutor {
    async fn execute(&self, _node: &NodeDefinition, ctx: &NodeContext) -> Result<NodeResult, ShuttleError> {
        Ok(NodeResult {
            output: ctx.global_input.clone(),
            ..Default::default()
        })
    }
}

pub struct OutputExecutor;

#[async_trait]
impl NodeExecutor for OutputExecutor {
    async fn execute(&self, _node: &NodeDefinition, ctx: &NodeContext) -> Result<NodeResult, ShuttleError> {
        Ok(NodeResult {
            output: ctx.previous_output.clone(),
            ..Default::default()
        })
    }
}
