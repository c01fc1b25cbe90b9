//! Agent：工作流树的叶子
//!
//! Agent 只读状态黑板，把结果以 AgentOutcome 交给引擎，由引擎写入声明过的输出键。
//! escalate 是调用结果的一部分（不是异常），由最近的外层循环消费。
//! - ReasoningAgent：推理单元 + 工具网关，内部「推理 → 工具 → 推理」直到得到最终结果
//! - HumanCheckpoint：阻塞读取操作员输入，退出词转为 escalate

pub mod human;
pub mod reasoning;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::{RunError, StateStore, ToolError};

pub use human::{ConsoleInput, ExitVocabulary, HumanCheckpoint, HumanInput, ScriptedInput};
pub use reasoning::ReasoningAgent;

#[async_trait]
pub trait Agent: Send + Sync {
    /// 工作流内唯一
    fn name(&self) -> &str;

    /// 允许写入的键；第一个为主输出键
    fn output_keys(&self) -> &[String];

    /// 期望读取的键（文档 / 校验用，缺失不致命）
    fn input_keys(&self) -> &[String] {
        &[]
    }

    async fn invoke(&self, store: &StateStore) -> Result<AgentOutcome, RunError>;
}

/// 单次工具调用的结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Ok,
    Escalated,
    Rejected,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub status: ToolCallStatus,
    pub duration_ms: u64,
}

impl ToolCallRecord {
    pub fn from_result(
        tool: &str,
        result: &Result<String, ToolError>,
        escalated: bool,
        elapsed: Duration,
    ) -> Self {
        let status = match result {
            Ok(_) if escalated => ToolCallStatus::Escalated,
            Ok(_) => ToolCallStatus::Ok,
            Err(ToolError::NotAllowed(_)) => ToolCallStatus::Rejected,
            Err(ToolError::Timeout { .. }) => ToolCallStatus::TimedOut,
            Err(ToolError::Failed { .. }) => ToolCallStatus::Failed,
        };
        Self {
            tool: tool.to_string(),
            status,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

/// 一次调用的结果：输出值、是否请求结束外层循环、发生过的工具调用
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutcome {
    pub outputs: Vec<(String, Value)>,
    pub escalate: bool,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl AgentOutcome {
    pub fn output(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            outputs: vec![(key.into(), value.into())],
            ..Self::default()
        }
    }

    /// 只请求结束循环，不写任何状态
    pub fn escalate() -> Self {
        Self {
            escalate: true,
            ..Self::default()
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.push((key.into(), value.into()));
        self
    }

    pub fn with_escalation(mut self) -> Self {
        self.escalate = true;
        self
    }
}
