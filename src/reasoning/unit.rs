//! 推理单元契约
//!
//! 给定指令、当前可见状态、可用工具与本次调用内已发生的工具往来，返回结果文本和零个或多个工具请求。
//! 内部实现（规则、模板、模型）对编排器不透明。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{ReasoningError, ToolError};
use crate::tools::ToolDescriptor;

/// 工具请求（与 LLM 输出的 `{"tool": "read_file", "args": {"path": "..."}}` 对应）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// 一次工具往来：请求与结果（失败 / 超时也如实交给推理单元）
#[derive(Debug, Clone)]
pub struct ToolExchange {
    pub request: ToolRequest,
    pub result: Result<String, ToolError>,
}

impl ToolExchange {
    pub fn observation(&self) -> String {
        match &self.result {
            Ok(output) => output.clone(),
            Err(e) => format!("Error: {}", e),
        }
    }
}

pub struct InferenceRequest<'a> {
    pub agent: &'a str,
    /// 已代入状态值的指令
    pub instructions: &'a str,
    pub visible_state: &'a BTreeMap<String, Value>,
    pub available_tools: &'a [ToolDescriptor],
    pub transcript: &'a [ToolExchange],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inference {
    pub result: String,
    pub tool_requests: Vec<ToolRequest>,
}

impl Inference {
    /// 最终结果，不再请求工具
    pub fn answer(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            tool_requests: Vec::new(),
        }
    }

    /// 请求一个工具
    pub fn call(tool: impl Into<String>, args: Value) -> Self {
        Self {
            result: String::new(),
            tool_requests: vec![ToolRequest::new(tool, args)],
        }
    }

    pub fn is_final(&self) -> bool {
        self.tool_requests.is_empty()
    }
}

#[async_trait]
pub trait ReasoningUnit: Send + Sync {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<Inference, ReasoningError>;
}
