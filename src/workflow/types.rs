//! 工作流类型定义
//!
//! 工作流是一棵只含三种节点的树：Agent（叶子）、Sequence（顺序）、Loop（有界循环）。
//! 运行前整体校验一次，运行中结构不可变。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::Agent;

/// 工作流节点
#[derive(Clone)]
pub enum Step {
    Agent(Arc<dyn Agent>),
    Sequence(Sequence),
    Loop(LoopBlock),
}

/// 按顺序各执行一次子节点
#[derive(Clone, Debug)]
pub struct Sequence {
    pub name: String,
    pub steps: Vec<Step>,
}

/// 反复执行子节点，直到某个子节点 escalate 或达到 max_iterations
#[derive(Clone, Debug)]
pub struct LoopBlock {
    pub name: String,
    pub body: Vec<Step>,
    pub max_iterations: u32,
    pub on_exhausted: ExhaustionPolicy,
}

/// 循环耗尽迭代次数时对外层的表现
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// 正常结束，外层继续
    #[default]
    Continue,
    /// 视为一次 escalate，结束最近的外层循环
    Escalate,
}

/// 循环停止原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "agent", rename_all = "snake_case")]
pub enum StopReason {
    EscalatedBy(String),
    MaxIterationsReached,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EscalatedBy(agent) => write!(f, "escalated by {}", agent),
            StopReason::MaxIterationsReached => write!(f, "max iterations reached"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    pub name: String,
    pub iterations: u32,
    pub stop: StopReason,
}

/// 一次运行的汇总；loops 按循环结束的先后排列（同一循环可出现多次）
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Agent 调用总次数
    pub invocations: u64,
    pub loops: Vec<LoopReport>,
}

impl RunReport {
    /// 某个循环最近一次结束的记录
    pub fn last_loop(&self, name: &str) -> Option<&LoopReport> {
        self.loops.iter().rev().find(|l| l.name == name)
    }
}

/// 工作流配置错误（运行前发现）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Composer '{0}' has no children")]
    EmptyComposer(String),
    #[error("Loop '{0}' must allow at least one iteration")]
    ZeroIterations(String),
    #[error("Agent '{0}' declares no output key")]
    NoOutputKey(String),
    #[error("Agent name '{0}' is used by more than one agent")]
    DuplicateAgentName(String),
    #[error("Invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
}

impl Step {
    pub fn agent(agent: impl Agent + 'static) -> Self {
        Step::Agent(Arc::new(agent))
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Agent(agent) => agent.name(),
            Step::Sequence(seq) => &seq.name,
            Step::Loop(lp) => &lp.name,
        }
    }

    /// 整树校验；同一个 Arc 出现多次视为同一 Agent，允许
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen: HashMap<String, *const ()> = HashMap::new();
        self.validate_into(&mut seen)
    }

    fn validate_into(&self, seen: &mut HashMap<String, *const ()>) -> Result<(), WorkflowError> {
        match self {
            Step::Agent(agent) => {
                if agent.output_keys().is_empty() {
                    return Err(WorkflowError::NoOutputKey(agent.name().to_string()));
                }
                let ptr = Arc::as_ptr(agent) as *const ();
                match seen.get(agent.name()) {
                    Some(existing) if *existing != ptr => {
                        Err(WorkflowError::DuplicateAgentName(agent.name().to_string()))
                    }
                    _ => {
                        seen.insert(agent.name().to_string(), ptr);
                        Ok(())
                    }
                }
            }
            Step::Sequence(seq) => {
                if seq.steps.is_empty() {
                    return Err(WorkflowError::EmptyComposer(seq.name.clone()));
                }
                seq.steps.iter().try_for_each(|s| s.validate_into(seen))
            }
            Step::Loop(lp) => {
                if lp.body.is_empty() {
                    return Err(WorkflowError::EmptyComposer(lp.name.clone()));
                }
                if lp.max_iterations == 0 {
                    return Err(WorkflowError::ZeroIterations(lp.name.clone()));
                }
                lp.body.iter().try_for_each(|s| s.validate_into(seen))
            }
        }
    }
}

impl From<Sequence> for Step {
    fn from(seq: Sequence) -> Self {
        Step::Sequence(seq)
    }
}

impl From<LoopBlock> for Step {
    fn from(lp: LoopBlock) -> Self {
        Step::Loop(lp)
    }
}

impl From<Arc<dyn Agent>> for Step {
    fn from(agent: Arc<dyn Agent>) -> Self {
        Step::Agent(agent)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Agent(agent) => write!(f, "Agent({})", agent.name()),
            Step::Sequence(seq) => seq.fmt(f),
            Step::Loop(lp) => lp.fmt(f),
        }
    }
}
