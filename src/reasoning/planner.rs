//! 基于 LLM 的推理单元
//!
//! system = 指令 + 可用工具列表 + tool call JSON Schema；user = 可见状态（JSON）；
//! 本次调用内的工具往来按 assistant / user 轮次回放。
//! parse_llm_output 把模型输出解析为工具请求或最终结果；JSON 格式错误时附带纠正提示重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::ReasoningError;
use crate::llm::{LlmClient, Message};
use crate::reasoning::{Inference, InferenceRequest, ReasoningUnit, ToolRequest};
use crate::tools::tool_call_schema_json;

/// 格式错误时的最多重试次数
const MAX_FORMAT_RETRIES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    Response(String),
    ToolCall(ToolRequest),
}

/// 以 ```json 代码块或以 `{` 开头、且带 `tool` 键的 JSON 视为工具调用；其余为最终结果。
/// 只有看起来是工具调用（含 "tool"）却无法解析时才报错，由调用方附带纠正提示重试；
/// 最终结果里夹带的非严格 JSON（注释、示例片段）原样作为结果返回。
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, ReasoningError> {
    let trimmed = output.trim();
    let response = || Ok(PlannerOutput::Response(trimmed.to_string()));

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if trimmed.starts_with('{') {
        trimmed
    } else {
        return response();
    };

    let value: serde_json::Value = match serde_json::from_str(json_str) {
        Ok(value) => value,
        Err(e) if json_str.contains("\"tool\"") => {
            return Err(ReasoningError(format!(
                "Malformed tool call JSON ({}): {}",
                e, json_str
            )))
        }
        Err(_) => return response(),
    };
    if value.get("tool").is_none() {
        return response();
    }
    let parsed: ToolRequest = serde_json::from_value(value)
        .map_err(|e| ReasoningError(format!("Malformed tool call ({}): {}", e, json_str)))?;

    if parsed.tool.is_empty() {
        response()
    } else {
        Ok(PlannerOutput::ToolCall(parsed))
    }
}

pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
    request_timeout: Duration,
}

impl LlmReasoner {
    pub fn new(llm: Arc<dyn LlmClient>, request_timeout: Duration) -> Self {
        Self {
            llm,
            request_timeout,
        }
    }

    fn build_messages(&self, request: &InferenceRequest<'_>) -> Vec<Message> {
        let tools = if request.available_tools.is_empty() {
            "(none)".to_string()
        } else {
            request
                .available_tools
                .iter()
                .map(|t| format!("- {}: {} | parameters: {}", t.name, t.description, t.parameters))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let system = format!(
            "{}\n\n## Available tools\n{}\n\nTo call a tool, reply with ONLY one JSON object matching this schema:\n{}\nWhen you are finished, reply with the final result as plain text.",
            request.instructions,
            tools,
            tool_call_schema_json()
        );
        let state = serde_json::to_string_pretty(request.visible_state).unwrap_or_default();

        let mut messages = vec![
            Message::system(system),
            Message::user(format!("Current state:\n{}", state)),
        ];
        for exchange in request.transcript {
            messages.push(Message::assistant(
                serde_json::to_string(&exchange.request).unwrap_or_default(),
            ));
            messages.push(Message::user(format!(
                "Observation from {}: {}",
                exchange.request.tool,
                exchange.observation()
            )));
        }
        messages
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, ReasoningError> {
        tokio::time::timeout(self.request_timeout, self.llm.complete(messages))
            .await
            .map_err(|_| {
                ReasoningError(format!(
                    "LLM request timed out after {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(ReasoningError)
    }
}

#[async_trait]
impl ReasoningUnit for LlmReasoner {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<Inference, ReasoningError> {
        let mut messages = self.build_messages(&request);
        let mut last_error = None;

        for attempt in 0..=MAX_FORMAT_RETRIES {
            let output = self.complete(&messages).await?;
            match parse_llm_output(&output) {
                Ok(PlannerOutput::Response(result)) => return Ok(Inference::answer(result)),
                Ok(PlannerOutput::ToolCall(call)) => {
                    return Ok(Inference {
                        result: String::new(),
                        tool_requests: vec![call],
                    })
                }
                Err(e) => {
                    tracing::warn!(agent = request.agent, attempt, error = %e, "unparseable model output");
                    messages.push(Message::assistant(output));
                    messages.push(Message::user(format!(
                        "Your last reply was not valid: {}. To call a tool reply with ONLY one JSON object like {{\"tool\": \"read_file\", \"args\": {{\"path\": \"lib/main.dart\"}}}}; otherwise reply in plain text.",
                        e
                    )));
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ReasoningError::new("no model output")))
    }
}
