//! `NodeExecutor` trait and `ExecutorRegistry`: one executor
//! per `NodeType`, looked up by the `GraphNodeRunner` before each Step.

mod agent_loop;
mod input_output;
mod llm_like;
mod memory;
mod tool;

pub use agent_loop::AgentLoopExecutor;
pub use input_output::{InputExecutor, OutputExecutor};
pub use llm_like::LlmLikeExecutor;
pub use memory::MemoryExecutor;
pub use tool::ToolExecutor;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ShuttleError;
use crate::model::{NodeContext, NodeDefinition, NodeResult, NodeType};

#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node: &NodeDefinition, ctx: &NodeContext) -> Result<NodeResult, ShuttleError>;
}

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) -> &mut Self {
        self.executors.insert(node_type, executor);
        self
    }

    pub fn lookup(&self, node_type: NodeType) -> Result<Arc<dyn NodeExecutor>, ShuttleError> {
        self.executors
            .get(&node_type)
            .cloned()
            .ok_or(ShuttleError::ExecutorNotFound(node_type))
    }
}
