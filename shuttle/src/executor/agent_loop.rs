//! `AgentLoop` executor: the ReAct driver. Runs an inner
//! think/act/observe loop up to `maxIterations`, persisting the whole thing
//! as a single outer Step while emitting one `AgentStep` trace event per
//! inner iteration for UI visualization.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use stream_event::EventPayload;

use crate::error::ShuttleError;
use crate::llm_invoker::{LlmInvoker, LlmRequest};
use crate::model::{AgentLoopNodeConfig, LlmNodeConfig, NodeContext, NodeDefinition, NodeResult};
use crate::tool_invoker::ToolInvoker;

use super::NodeExecutor;

/// The two shapes an LLM turn can take. The wire contract is intentionally
/// minimal JSON (no provider-specific function-calling format) since
/// concrete provider adapters are out of scope.
#[derive(Deserialize)]
#[serde(untagged)]
enum AgentTurn {
    ToolCall {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolInput", default)]
        tool_input: Value,
        #[serde(default)]
        thought: Option<String>,
    },
    FinalAnswer {
        #[serde(rename = "finalAnswer")]
        final_answer: Value,
        #[serde(default)]
        thought: Option<String>,
    },
}

pub struct AgentLoopExecutor {
    llm: Arc<dyn LlmInvoker>,
    tools: Arc<dyn ToolInvoker>,
    tool_timeout: Duration,
}

impl AgentLoopExecutor {
    pub fn new(llm: Arc<dyn LlmInvoker>, tools: Arc<dyn ToolInvoker>, tool_timeout: Duration) -> Self {
        Self {
            llm,
            tools,
            tool_timeout,
        }
    }

    fn build_prompt(system_prompt: &str, goal: &Value, trace: &[String]) -> String {
        let mut prompt = String::new();
        prompt.push_str(system_prompt);
        prompt.push_str("\n\nGoal: ");
        prompt.push_str(&goal.to_string());
        for line in trace {
            prompt.push('\n');
            prompt.push_str(line);
        }
        prompt
    }
}

#[async_trait]
impl NodeExecutor for AgentLoopExecutor {
    async fn execute(&self, node: &NodeDefinition, ctx: &NodeContext) -> Result<NodeResult, ShuttleError> {
        let config = AgentLoopNodeConfig::from_value(&node.config)?;
        let mut trace: Vec<String> = Vec::new();
        let mut total_tokens = 0u64;
        let mut total_cost = 0.0f64;
        let mut no_progress_streak = 0u32;
        let mut last_action_key: Option<String> = None;

        for iteration in 0..config.max_iterations {
            if ctx.cancel_token.is_cancelled() {
                return Err(ShuttleError::System("cancelled".to_string()));
            }

            let rendered_prompt = Self::build_prompt(&config.system_prompt, &ctx.global_input, &trace);
            let llm_config = LlmNodeConfig {
                provider: "agent-loop".to_string(),
                model: "agent-loop".to_string(),
                temperature: config.temperature,
                top_p: 1.0,
                max_tokens: Some(config.max_tokens),
                system_prompt: Some(config.system_prompt.clone()),
                prompt_template: None,
            };
            let invocation = self
                .llm
                .invoke(LlmRequest {
                    config: llm_config,
                    rendered_prompt: rendered_prompt.clone(),
                    previous_output: ctx.previous_output.clone(),
                })
                .await?;
            total_tokens += invocation.tokens;
            total_cost += invocation.cost_usd;

            let turn: Result<AgentTurn, _> = serde_json::from_str(&invocation.text);
            let Ok(turn) = turn else {
                no_progress_streak += 1;
                let _ = ctx.events.send(EventPayload::AgentStep {
                    iteration,
                    thought: None,
                    action: None,
                    action_input: None,
                    observation: Some(Value::String("unparseable response".to_string())),
                });
                if no_progress_streak >= 2 {
                    return Err(ShuttleError::Validation(
                        "agent loop made no progress for two consecutive iterations".to_string(),
                    ));
                }
                continue;
            };

            match turn {
                AgentTurn::FinalAnswer { final_answer, thought } => {
                    let _ = ctx.events.send(EventPayload::AgentStep {
                        iteration,
                        thought,
                        action: None,
                        action_input: None,
                        observation: None,
                    });
                    return Ok(NodeResult {
                        output: final_answer,
                        rendered_prompt: Some(rendered_prompt),
                        tokens: total_tokens,
                        cost_usd: total_cost,
                        provider_meta: None,
                    });
                }
                AgentTurn::ToolCall {
                    tool_name,
                    tool_input,
                    thought,
                } => {
                    if !config.available_tools.is_empty() && !config.available_tools.contains(&tool_name) {
                        return Err(ShuttleError::Validation(format!(
                            "tool {tool_name} is not in availableTools"
                        )));
                    }
                    let action_key = format!("{tool_name}:{tool_input}");
                    if Some(&action_key) == last_action_key.as_ref() {
                        no_progress_streak += 1;
                    } else {
                        no_progress_streak = 0;
                    }
                    last_action_key = Some(action_key);

                    if no_progress_streak >= 2 {
                        return Err(ShuttleError::Validation(
                            "agent loop made no progress for two consecutive iterations".to_string(),
                        ));
                    }

                    let observation = self
                        .tools
                        .invoke(&tool_name, "latest", tool_input.clone(), self.tool_timeout)
                        .await;
                    let observation_value = match &observation {
                        Ok(v) => v.clone(),
                        Err(e) => Value::String(e.to_string()),
                    };
                    let _ = ctx.events.send(EventPayload::AgentStep {
                        iteration,
                        thought,
                        action: Some(tool_name.clone()),
                        action_input: Some(tool_input.clone()),
                        observation: Some(observation_value.clone()),
                    });
                    trace.push(format!(
                        "Action: {tool_name}({tool_input})\nObservation: {observation_value}"
                    ));
                }
            }
        }

        Err(ShuttleError::Timeout("iteration_budget_exceeded".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_invoker::{StubLlmInvoker, StubResponse};
    use crate::model::{CacheStrategy, NodeType};
    use crate::tool_invoker::StubToolInvoker;
    use serde_json::json;

    fn node_with_config(config: Value) -> NodeDefinition {
        NodeDefinition {
            id: "n1".into(),
            node_type: NodeType::AgentLoop,
            label: "n".into(),
            version: 1,
            retry: None,
            guardrails: None,
            cache: CacheStrategy::NoCache,
            config,
            metadata: Default::default(),
        }
    }

    fn ctx() -> NodeContext {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        NodeContext {
            run_id: "r1".into(),
            node_id: "n1".into(),
            previous_output: Value::Null,
            global_input: json!({"goal": "find the time"}),
            run_memory: Default::default(),
            cancel_token: Default::default(),
            events: tx,
        }
    }

    #[tokio::test]
    async fn completes_with_final_answer() {
        let llm = Arc::new(StubLlmInvoker::fixed(
            json!({"finalAnswer": "42"}).to_string(),
            5,
            0.01,
        ));
        let tools = Arc::new(StubToolInvoker::get_time_example());
        let exec = AgentLoopExecutor::new(llm, tools, Duration::from_secs(1));
        let node = node_with_config(json!({
            "systemPrompt": "You are helpful",
            "maxIterations": 3,
            "maxTokens": 100,
        }));
        let result = exec.execute(&node, &ctx()).await.unwrap();
        assert_eq!(result.output, Value::String("42".to_string()));
        assert_eq!(result.tokens, 5);
    }

    #[tokio::test]
    async fn tool_call_then_final_answer() {
        let llm = Arc::new(StubLlmInvoker::new(vec![
            StubResponse::Text {
                text: json!({"toolName": "get_time", "toolInput": {}}).to_string(),
                tokens: 2,
                cost_usd: 0.0,
            },
            StubResponse::Text {
                text: json!({"finalAnswer": "it is 2024"}).to_string(),
                tokens: 3,
                cost_usd: 0.0,
            },
        ]));
        let tools = Arc::new(StubToolInvoker::get_time_example());
        let exec = AgentLoopExecutor::new(llm, tools, Duration::from_secs(1));
        let node = node_with_config(json!({
            "systemPrompt": "You are helpful",
            "availableTools": ["get_time"],
            "maxIterations": 5,
            "maxTokens": 100,
        }));
        let result = exec.execute(&node, &ctx()).await.unwrap();
        assert_eq!(result.output, Value::String("it is 2024".to_string()));
        assert_eq!(result.tokens, 5);
    }

    #[tokio::test]
    async fn exhausting_max_iterations_is_timeout_error() {
        let llm = Arc::new(StubLlmInvoker::fixed(
            json!({"toolName": "get_time", "toolInput": {"x": 1}}).to_string(),
            1,
            0.0,
        ));
        let tools = Arc::new(StubToolInvoker::get_time_example().with_call_result(json!({"x": 2})));
        let exec = AgentLoopExecutor::new(llm, tools, Duration::from_secs(1));
        let node = node_with_config(json!({
            "systemPrompt": "You are helpful",
            "availableTools": ["get_time"],
            "maxIterations": 3,
            "maxTokens": 100,
        }));
        let err = exec.execute(&node, &ctx()).await;
        match err {
            Err(ShuttleError::Timeout(msg)) => assert_eq!(msg, "iteration_budget_exceeded"),
            other => panic!("expected Timeout error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_response_twice_is_validation_error() {
        let llm = Arc::new(StubLlmInvoker::fixed("not json".to_string(), 1, 0.0));
        let tools = Arc::new(StubToolInvoker::get_time_example());
        let exec = AgentLoopExecutor::new(llm, tools, Duration::from_secs(1));
        let node = node_with_config(json!({
            "systemPrompt": "You are helpful",
            "maxIterations": 5,
            "maxTokens": 100,
        }));
        let err = exec.execute(&node, &ctx()).await;
        assert!(matches!(err, Err(ShuttleError::Validation(_))));
    }

    #[tokio::test]
    async fn tool_outside_available_tools_is_rejected() {
        let llm = Arc::new(StubLlmInvoker::fixed(
            json!({"toolName": "unlisted_tool", "toolInput": {}}).to_string(),
            1,
            0.0,
        ));
        let tools = Arc::new(StubToolInvoker::get_time_example());
        let exec = AgentLoopExecutor::new(llm, tools, Duration::from_secs(1));
        let node = node_with_config(json!({
            "systemPrompt": "You are helpful",
            "availableTools": ["get_time"],
            "maxIterations": 3,
            "maxTokens": 100,
        }));
        let err = exec.execute(&node, &ctx()).await;
        assert!(matches!(err, Err(ShuttleError::Validation(_))));
    }
}
