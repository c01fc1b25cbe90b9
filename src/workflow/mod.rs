//! 工作流：Agent / Sequence / Loop 组成的树，构建器与执行引擎

pub mod builder;
pub mod engine;
pub mod events;
pub mod types;

pub use builder::{LoopBuilder, SequenceBuilder};
pub use engine::WorkflowRunner;
pub use events::WorkflowEvent;
pub use types::*;
