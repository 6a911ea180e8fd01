//! `LLMInvoker` capability: the only way node executors reach a
//! model provider. Concrete provider adapters are out of scope for this
//! crate; it supplies the trait plus a deterministic stub used by tests and
//! examples.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ShuttleError;
use crate::model::LlmNodeConfig;

/// What an `LLM`/`PLANNING`/`REFLECTION` node or the `AgentLoop` driver hands
/// to the invoker: the typed config, the already-rendered prompt text, and
/// the raw `previousOutput` for providers that want structured context.
pub struct LlmRequest {
    pub config: LlmNodeConfig,
    pub rendered_prompt: String,
    pub previous_output: Value,
}

#[derive(Clone, Debug)]
pub struct LlmInvocation {
    pub text: String,
    pub tokens: u64,
    pub cost_usd: f64,
    pub provider_meta: Option<Value>,
}

#[async_trait]
pub trait LlmInvoker: Send + Sync {
    async fn invoke(&self, request: LlmRequest) -> Result<LlmInvocation, ShuttleError>;
}

#[derive(Clone, Debug)]
pub enum StubResponse {
    Text {
        text: String,
        tokens: u64,
        cost_usd: f64,
    },
    Fail(String),
}

/// Scripted responses returned in order; once exhausted, repeats the last
/// one. Used by tests in place of a real provider adapter.
pub struct StubLlmInvoker {
    queue: Mutex<VecDeque<StubResponse>>,
    last: Mutex<Option<StubResponse>>,
}

impl StubLlmInvoker {
    pub fn new(responses: Vec<StubResponse>) -> Self {
        Self {
            queue: Mutex::new(responses.into()),
            last: Mutex::new(None),
        }
    }

    pub fn fixed(text: impl Into<String>, tokens: u64, cost_usd: f64) -> Self {
        Self::new(vec![StubResponse::Text {
            text: text.into(),
            tokens,
            cost_usd,
        }])
    }
}

#[async_trait]
impl LlmInvoker for StubLlmInvoker {
    async fn invoke(&self, _request: LlmRequest) -> Result<LlmInvocation, ShuttleError> {
        let next = self.queue.lock().unwrap().pop_front();
        let resp = match next {
            Some(r) => {
                *self.last.lock().unwrap() = Some(r.clone());
                r
            }
            None => self.last.lock().unwrap().clone().unwrap_or(StubResponse::Text {
                text: String::new(),
                tokens: 0,
                cost_usd: 0.0,
            }),
        };
        match resp {
            StubResponse::Text {
                text,
                tokens,
                cost_usd,
            } => Ok(LlmInvocation {
                text,
                tokens,
                cost_usd,
                provider_meta: None,
            }),
            StubResponse::Fail(msg) => Err(ShuttleError::Provider(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> LlmRequest {
        LlmRequest {
            config: LlmNodeConfig {
                provider: "stub".into(),
                model: "stub-1".into(),
                temperature: 1.0,
                top_p: 1.0,
                max_tokens: None,
                system_prompt: None,
                prompt_template: None,
            },
            rendered_prompt: "hi".into(),
            previous_output: Value::Null,
        }
    }

    #[tokio::test]
    async fn fixed_stub_always_returns_same_response() {
        let stub = StubLlmInvoker::fixed("echo: hi", 4, 0.01);
        let r1 = stub.invoke(req()).await.unwrap();
        let r2 = stub.invoke(req()).await.unwrap();
        assert_eq!(r1.text, "echo: hi");
        assert_eq!(r2.text, "echo: hi");
        assert_eq!(r1.tokens, 4);
    }

    #[tokio::test]
    async fn scripted_stub_fails_then_succeeds() {
        let stub = StubLlmInvoker::new(vec![
            StubResponse::Fail("boom".into()),
            StubResponse::Fail("boom".into()),
            StubResponse::Text {
                text: "ok".into(),
                tokens: 1,
                cost_usd: 0.0,
            },
        ]);
        assert!(stub.invoke(req()).await.is_err());
        assert!(stub.invoke(req()).await.is_err());
        let ok = stub.invoke(req()).await.unwrap();
        assert_eq!(ok.text, "ok");
        // Exhausted: repeats last (success) response.
        let again = stub.invoke(req()).await.unwrap();
        assert_eq!(again.text, "ok");
    }
}
