//! 推理层：推理单元契约、指令模板、基于 LLM 的实现

pub mod planner;
pub mod template;
pub mod unit;

pub use planner::{parse_llm_output, LlmReasoner, PlannerOutput};
pub use unit::{Inference, InferenceRequest, ReasoningUnit, ToolExchange, ToolRequest};
