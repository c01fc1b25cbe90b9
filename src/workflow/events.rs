//! 运行过程事件：可序列化为 JSON，供日志 / 前端流式展示

use serde::Serialize;

use crate::agent::ToolCallStatus;
use crate::workflow::StopReason;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted { run_id: String },
    /// 循环开始第 iteration 轮（从 1 计）
    LoopIteration {
        loop_name: String,
        iteration: u32,
        max_iterations: u32,
    },
    AgentStarted { agent: String },
    /// 工具调用（预览，不含参数与输出）
    ToolCall {
        agent: String,
        tool: String,
        status: ToolCallStatus,
        duration_ms: u64,
    },
    AgentFinished {
        agent: String,
        /// 本次写入的键
        written: Vec<String>,
        escalate: bool,
    },
    /// 不在任何循环内的 escalate，被忽略
    EscalationIgnored { agent: String },
    LoopStopped {
        loop_name: String,
        iterations: u32,
        stop: StopReason,
    },
    RunFinished { run_id: String, invocations: u64 },
    RunFailed { run_id: String, error: String },
}
