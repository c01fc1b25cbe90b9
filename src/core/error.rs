//! 错误类型
//!
//! - ToolError：单次工具调用失败（超时 / 提供方报错 / 不在白名单），只属于当前 Agent，由其推理单元自行处理
//! - ReasoningError：推理单元未能给出结果
//! - RunError：会中止整个工作流运行的错误（推理失败、配置错误、人工输入通道故障、取消）

use std::time::Duration;

use thiserror::Error;

use crate::workflow::WorkflowError;

/// 工具调用错误：作为观察结果交还给调用方 Agent，网关不重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool '{0}' is not available to this agent")]
    NotAllowed(String),

    #[error("Tool '{tool}' timed out after {}ms", timeout.as_millis())]
    Timeout { tool: String, timeout: Duration },

    #[error("Tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

impl ToolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }
}

/// 推理单元自身失败（模型不可用、输出无法解析、请求超时等）
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct ReasoningError(pub String);

impl ReasoningError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// 运行级错误：出现即中止本次运行（进程不退出）
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Agent '{agent}' failed to produce a result: {message}")]
    ReasoningFailure { agent: String, message: String },

    #[error("Invalid workflow: {0}")]
    Configuration(#[from] WorkflowError),

    #[error("Agent '{agent}' wrote undeclared state key '{key}'")]
    UndeclaredOutput { agent: String, key: String },

    #[error("Human input channel failed for '{agent}': {message}")]
    HumanInput { agent: String, message: String },

    #[error("Run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn reasoning(agent: &str, err: ReasoningError) -> Self {
        RunError::ReasoningFailure {
            agent: agent.to_string(),
            message: err.0,
        }
    }
}
