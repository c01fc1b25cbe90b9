//! 工作流构建器
//!
//! 提供流畅的 API 来组装 Sequence / Loop，build 时校验当前层级

use std::sync::Arc;

use crate::agent::Agent;
use crate::workflow::types::*;

/// Sequence 构建器
pub struct SequenceBuilder {
    name: String,
    steps: Vec<Step>,
}

impl SequenceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// 追加一个 Agent
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.steps.push(Step::Agent(agent));
        self
    }

    /// 追加任意子节点
    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn build(self) -> Result<Sequence, WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::EmptyComposer(self.name));
        }
        Ok(Sequence {
            name: self.name,
            steps: self.steps,
        })
    }
}

/// Loop 构建器
pub struct LoopBuilder {
    name: String,
    body: Vec<Step>,
    max_iterations: u32,
    on_exhausted: ExhaustionPolicy,
}

impl LoopBuilder {
    pub fn new(name: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            name: name.into(),
            body: Vec::new(),
            max_iterations,
            on_exhausted: ExhaustionPolicy::default(),
        }
    }

    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.body.push(Step::Agent(agent));
        self
    }

    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.body.push(step.into());
        self
    }

    /// 设置耗尽策略
    pub fn on_exhausted(mut self, policy: ExhaustionPolicy) -> Self {
        self.on_exhausted = policy;
        self
    }

    pub fn build(self) -> Result<LoopBlock, WorkflowError> {
        if self.body.is_empty() {
            return Err(WorkflowError::EmptyComposer(self.name));
        }
        if self.max_iterations == 0 {
            return Err(WorkflowError::ZeroIterations(self.name));
        }
        Ok(LoopBlock {
            name: self.name,
            body: self.body,
            max_iterations: self.max_iterations,
            on_exhausted: self.on_exhausted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentOutcome;
    use crate::core::{RunError, StateStore};
    use async_trait::async_trait;

    struct Noop {
        name: &'static str,
        keys: Vec<String>,
    }

    impl Noop {
        fn arc(name: &'static str) -> Arc<dyn Agent> {
            Arc::new(Noop {
                name,
                keys: vec![format!("{}_out", name)],
            })
        }
    }

    #[async_trait]
    impl Agent for Noop {
        fn name(&self) -> &str {
            self.name
        }

        fn output_keys(&self) -> &[String] {
            &self.keys
        }

        async fn invoke(&self, _store: &StateStore) -> Result<AgentOutcome, RunError> {
            Ok(AgentOutcome::default())
        }
    }

    #[test]
    fn test_build_nested_workflow() {
        let inner = LoopBuilder::new("DevelopmentLoop", 20)
            .agent(Noop::arc("TesterAgent"))
            .agent(Noop::arc("ProjectRefinerAgent"))
            .build()
            .unwrap();
        let root = SequenceBuilder::new("Pipeline")
            .agent(Noop::arc("InitialDeveloperAgent"))
            .step(inner)
            .build()
            .unwrap();

        assert_eq!(root.steps.len(), 2);
        assert_eq!(root.steps[1].name(), "DevelopmentLoop");
        let debug = format!("{:?}", root);
        assert!(debug.contains("Agent(TesterAgent)"));
        assert!(debug.contains("max_iterations: 20"));
        assert!(Step::from(root).validate().is_ok());
    }

    #[test]
    fn test_empty_and_zero_rejected() {
        assert_eq!(
            SequenceBuilder::new("Empty").build().unwrap_err(),
            WorkflowError::EmptyComposer("Empty".to_string())
        );
        assert_eq!(
            LoopBuilder::new("Never", 0).agent(Noop::arc("A")).build().unwrap_err(),
            WorkflowError::ZeroIterations("Never".to_string())
        );
    }

    #[test]
    fn test_shared_agent_allowed_but_duplicate_name_rejected() {
        let shared = Noop::arc("TesterAgent");
        let ok: Step = SequenceBuilder::new("S")
            .agent(shared.clone())
            .agent(shared)
            .build()
            .unwrap()
            .into();
        assert!(ok.validate().is_ok());

        let clash: Step = SequenceBuilder::new("S")
            .agent(Noop::arc("TesterAgent"))
            .agent(Noop::arc("TesterAgent"))
            .build()
            .unwrap()
            .into();
        assert_eq!(
            clash.validate().unwrap_err(),
            WorkflowError::DuplicateAgentName("TesterAgent".to_string())
        );
    }

    #[test]
    fn test_agent_without_output_key_rejected() {
        let silent: Arc<dyn Agent> = Arc::new(Noop { name: "Silent", keys: vec![] });
        assert_eq!(
            Step::Agent(silent).validate().unwrap_err(),
            WorkflowError::NoOutputKey("Silent".to_string())
        );
    }
}
