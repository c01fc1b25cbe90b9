//! ReasoningAgent
//!
//! 调用时从黑板代入指令模板 -> infer -> 若有工具请求则经网关执行并把结果（含失败 / 超时）
//! 写入本次调用的 transcript -> 再次 infer，直到推理单元给出最终结果。
//! 最终结果无条件写入主输出键；调用 exit_loop 只额外置 escalate，不影响写入。
//! 轮数由推理单元自行收敛，max_tool_rounds 只是兜底。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{Agent, AgentOutcome, ToolCallRecord};
use crate::core::{RunError, StateStore};
use crate::reasoning::{template, InferenceRequest, ReasoningUnit, ToolExchange};
use crate::tools::{ToolGateway, ToolReply};

const DEFAULT_MAX_TOOL_ROUNDS: usize = 20;

pub struct ReasoningAgent {
    name: String,
    description: String,
    instructions: String,
    output_keys: Vec<String>,
    input_keys: Vec<String>,
    reasoner: Arc<dyn ReasoningUnit>,
    gateway: ToolGateway,
    max_tool_rounds: usize,
}

impl ReasoningAgent {
    /// input_keys 默认取指令模板中的占位符
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        output_key: impl Into<String>,
        reasoner: Arc<dyn ReasoningUnit>,
    ) -> Self {
        let instructions = instructions.into();
        Self {
            name: name.into(),
            description: String::new(),
            input_keys: template::placeholders(&instructions),
            instructions,
            output_keys: vec![output_key.into()],
            reasoner,
            gateway: ToolGateway::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_gateway(mut self, gateway: ToolGateway) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn finish(&self, result: String, escalate: bool, tool_calls: Vec<ToolCallRecord>) -> AgentOutcome {
        AgentOutcome {
            outputs: vec![(self.output_keys[0].clone(), Value::String(result))],
            escalate,
            tool_calls,
        }
    }
}

#[async_trait]
impl Agent for ReasoningAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    async fn invoke(&self, store: &StateStore) -> Result<AgentOutcome, RunError> {
        let instructions = template::render(&self.instructions, store);
        let visible_state = store.select(&self.input_keys);
        let tools = self.gateway.available_tools();

        let mut transcript: Vec<ToolExchange> = Vec::new();
        let mut tool_calls = Vec::new();
        let mut escalate = false;
        let mut last_result = String::new();

        for round in 0..self.max_tool_rounds {
            let inference = self
                .reasoner
                .infer(InferenceRequest {
                    agent: &self.name,
                    instructions: &instructions,
                    visible_state: &visible_state,
                    available_tools: &tools,
                    transcript: &transcript,
                })
                .await
                .map_err(|e| RunError::reasoning(&self.name, e))?;

            if inference.is_final() {
                tracing::debug!(agent = %self.name, rounds = round, "agent produced final result");
                return Ok(self.finish(inference.result, escalate, tool_calls));
            }
            if !inference.result.is_empty() {
                last_result = inference.result;
            }

            for request in inference.tool_requests {
                let start = Instant::now();
                let mut escalated = false;
                let result = match self.gateway.call(&request.tool, request.args.clone()).await {
                    Ok(ToolReply::Escalate) => {
                        escalated = true;
                        Ok("{}".to_string())
                    }
                    Ok(ToolReply::Output(output)) => Ok(output),
                    Err(e) => {
                        tracing::warn!(agent = %self.name, error = %e, "tool call failed");
                        Err(e)
                    }
                };
                escalate |= escalated;
                tool_calls.push(ToolCallRecord::from_result(
                    &request.tool,
                    &result,
                    escalated,
                    start.elapsed(),
                ));
                transcript.push(ToolExchange { request, result });
            }
        }

        tracing::warn!(agent = %self.name, limit = self.max_tool_rounds, "tool round limit reached");
        let result = format!(
            "Reached the tool round limit ({}). Last result:\n{}",
            self.max_tool_rounds, last_result
        );
        Ok(self.finish(result, escalate, tool_calls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ToolCallStatus;
    use crate::core::ReasoningError;
    use crate::reasoning::Inference;
    use crate::tools::{RegistryProvider, Tool, ToolFilter, ToolRegistry};
    use serde_json::json;
    use std::time::Duration;

    /// 第一轮请求固定工具，之后把最后一次观察作为结果
    struct CallThenReport {
        tool: &'static str,
    }

    #[async_trait]
    impl ReasoningUnit for CallThenReport {
        async fn infer(&self, request: InferenceRequest<'_>) -> Result<Inference, ReasoningError> {
            match request.transcript.last() {
                None => Ok(Inference::call(self.tool, json!({}))),
                Some(exchange) => Ok(Inference::answer(format!(
                    "{} | {}",
                    request.instructions,
                    exchange.observation()
                ))),
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl ReasoningUnit for Failing {
        async fn infer(&self, _request: InferenceRequest<'_>) -> Result<Inference, ReasoningError> {
            Err(ReasoningError::new("model unavailable"))
        }
    }

    struct AlwaysCalls;

    #[async_trait]
    impl ReasoningUnit for AlwaysCalls {
        async fn infer(&self, _request: InferenceRequest<'_>) -> Result<Inference, ReasoningError> {
            Ok(Inference::call("list_sessions", json!({})))
        }
    }

    struct Stuck;

    #[async_trait]
    impl Tool for Stuck {
        fn name(&self) -> &str {
            "run_tests"
        }

        fn description(&self) -> &str {
            "Hangs forever"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("never".to_string())
        }
    }

    fn stuck_gateway() -> ToolGateway {
        let mut registry = ToolRegistry::new();
        registry.register(Stuck);
        ToolGateway::new().bind(
            Arc::new(RegistryProvider::new("tests", registry, Duration::from_millis(30))),
            ToolFilter::All,
        )
    }

    #[tokio::test]
    async fn test_escalation_still_writes_output() {
        let agent = ReasoningAgent::new(
            "TesterAgent",
            "Testing {current_project}",
            "test_results",
            Arc::new(CallThenReport { tool: "exit_loop" }),
        )
        .with_gateway(ToolGateway::new().with_escalation());
        let store = StateStore::seeded([("current_project", "/work/app")]);

        let outcome = agent.invoke(&store).await.unwrap();
        assert!(outcome.escalate);
        assert_eq!(
            outcome.outputs,
            vec![("test_results".to_string(), json!("Testing /work/app | {}"))]
        );
        assert_eq!(outcome.tool_calls[0].status, ToolCallStatus::Escalated);
        assert_eq!(agent.input_keys(), &["current_project".to_string()]);
    }

    #[tokio::test]
    async fn test_exit_loop_without_permission_is_observed_not_escalated() {
        let agent = ReasoningAgent::new(
            "ProjectRefinerAgent",
            "Refine",
            "current_project",
            Arc::new(CallThenReport { tool: "exit_loop" }),
        );
        let outcome = agent.invoke(&StateStore::new()).await.unwrap();
        assert!(!outcome.escalate);
        assert_eq!(outcome.tool_calls[0].status, ToolCallStatus::Rejected);
        assert!(outcome.outputs[0].1.as_str().unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn test_tool_timeout_becomes_issue_report() {
        let agent = ReasoningAgent::new(
            "TesterAgent",
            "Report",
            "test_results",
            Arc::new(CallThenReport { tool: "run_tests" }),
        )
        .with_gateway(stuck_gateway());
        let outcome = agent.invoke(&StateStore::new()).await.unwrap();
        assert_eq!(outcome.tool_calls[0].status, ToolCallStatus::TimedOut);
        let report = outcome.outputs[0].1.as_str().unwrap();
        assert!(report.contains("timed out"));
    }

    #[tokio::test]
    async fn test_reasoning_failure_is_fatal() {
        let agent = ReasoningAgent::new("InitialDeveloperAgent", "Build", "current_project", Arc::new(Failing));
        let err = agent.invoke(&StateStore::new()).await.unwrap_err();
        assert!(matches!(err, RunError::ReasoningFailure { ref agent, .. } if agent == "InitialDeveloperAgent"));
    }

    #[tokio::test]
    async fn test_round_limit_yields_output() {
        let agent = ReasoningAgent::new("Looper", "Loop", "out", Arc::new(AlwaysCalls))
            .with_max_tool_rounds(3);
        let outcome = agent.invoke(&StateStore::new()).await.unwrap();
        assert_eq!(outcome.tool_calls.len(), 3);
        assert!(outcome.outputs[0].1.as_str().unwrap().starts_with("Reached the tool round limit (3)"));
    }
}
