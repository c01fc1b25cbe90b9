//! devloop - Rust 智能体工作流引擎
//!
//! 模块划分：
//! - **agent**: Agent 契约、推理型 Agent、人工检查点
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、状态黑板、中断与清理
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **pipeline**: Web 应用开发流水线（初始开发 → 测试/修复循环 → 交互式会话）
//! - **reasoning**: 推理单元契约、指令模板、基于 LLM 的推理实现
//! - **tools**: 工具提供方、调用网关、进程族与文件族工具
//! - **workflow**: Sequence / Loop 组合与执行引擎

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod reasoning;
pub mod tools;
pub mod workflow;

pub use agent::{Agent, AgentOutcome};
pub use core::{RunError, StateStore};
pub use workflow::{RunReport, WorkflowRunner};
