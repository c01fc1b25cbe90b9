//! 工作流引擎
//!
//! 深度优先、严格串行地执行工作流树：同一时刻只有一个 Agent 在运行，状态写入按调用顺序生效。
//! escalate 以 Flow::Escalated 沿树向上传递，被最近的外层循环消费；Sequence 只负责跳过余下子节点。

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{RunError, StateStore};
use crate::workflow::events::WorkflowEvent;
use crate::workflow::types::*;

/// 子节点执行后的控制流
#[derive(Debug, Clone, PartialEq, Eq)]
enum Flow {
    Continue,
    Escalated { by: String },
}

#[derive(Default)]
struct RunStats {
    invocations: u64,
    loops: Vec<LoopReport>,
}

/// 工作流执行器
pub struct WorkflowRunner {
    root: Step,
    events: Option<mpsc::UnboundedSender<WorkflowEvent>>,
    cancel: CancellationToken,
}

impl WorkflowRunner {
    /// 校验整棵树；配置错误在任何 Agent 运行之前返回
    pub fn new(root: impl Into<Step>) -> Result<Self, RunError> {
        let root = root.into();
        root.validate()?;
        Ok(Self {
            root,
            events: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn root(&self) -> &Step {
        &self.root
    }

    /// 在给定黑板上执行一次。取消时正在运行的 Agent 被丢弃，其结果不会写入。
    pub async fn run(&self, store: &mut StateStore) -> Result<RunReport, RunError> {
        let run_id = format!("run_{}", uuid::Uuid::new_v4());
        let started_at = chrono::Utc::now();
        let mut stats = RunStats::default();

        tracing::info!(run_id = %run_id, root = %self.root.name(), "workflow run started");
        self.emit(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
        });

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunError::Cancelled),
            r = self.execute(&self.root, store, &mut stats, false) => r,
        };

        match result {
            Ok(_) => {
                tracing::info!(run_id = %run_id, invocations = stats.invocations, "workflow run finished");
                self.emit(WorkflowEvent::RunFinished {
                    run_id: run_id.clone(),
                    invocations: stats.invocations,
                });
                Ok(RunReport {
                    run_id,
                    started_at,
                    finished_at: chrono::Utc::now(),
                    invocations: stats.invocations,
                    loops: stats.loops,
                })
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "workflow run aborted");
                self.emit(WorkflowEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event);
        }
    }

    fn execute<'a>(
        &'a self,
        step: &'a Step,
        store: &'a mut StateStore,
        stats: &'a mut RunStats,
        in_loop: bool,
    ) -> BoxFuture<'a, Result<Flow, RunError>> {
        async move {
            match step {
                Step::Agent(agent) => {
                    stats.invocations += 1;
                    let name = agent.name().to_string();
                    tracing::info!(agent = %name, "agent started");
                    self.emit(WorkflowEvent::AgentStarted { agent: name.clone() });

                    let outcome = agent.invoke(store).await?;

                    for record in &outcome.tool_calls {
                        self.emit(WorkflowEvent::ToolCall {
                            agent: name.clone(),
                            tool: record.tool.clone(),
                            status: record.status,
                            duration_ms: record.duration_ms,
                        });
                    }
                    // 先整体检查再写入，避免部分写入
                    if let Some((key, _)) = outcome
                        .outputs
                        .iter()
                        .find(|(key, _)| !agent.output_keys().contains(key))
                    {
                        return Err(RunError::UndeclaredOutput {
                            agent: name,
                            key: key.clone(),
                        });
                    }
                    let written: Vec<String> = outcome.outputs.iter().map(|(k, _)| k.clone()).collect();
                    for (key, value) in outcome.outputs {
                        store.set(key, value);
                    }
                    tracing::info!(agent = %name, written = ?written, escalate = outcome.escalate, "agent finished");
                    self.emit(WorkflowEvent::AgentFinished {
                        agent: name.clone(),
                        written,
                        escalate: outcome.escalate,
                    });

                    if !outcome.escalate {
                        Ok(Flow::Continue)
                    } else if in_loop {
                        Ok(Flow::Escalated { by: name })
                    } else {
                        tracing::warn!(agent = %name, "escalation outside any loop ignored");
                        self.emit(WorkflowEvent::EscalationIgnored { agent: name });
                        Ok(Flow::Continue)
                    }
                }
                Step::Sequence(seq) => {
                    for child in &seq.steps {
                        if let Flow::Escalated { by } = self.execute(child, store, stats, in_loop).await? {
                            tracing::debug!(sequence = %seq.name, by = %by, "sequence cut short by escalation");
                            return Ok(Flow::Escalated { by });
                        }
                    }
                    Ok(Flow::Continue)
                }
                Step::Loop(lp) => {
                    let mut iterations = 0;
                    let mut stop = StopReason::MaxIterationsReached;
                    'iterations: for iteration in 1..=lp.max_iterations {
                        iterations = iteration;
                        tracing::info!(loop_name = %lp.name, iteration, max = lp.max_iterations, "loop iteration");
                        self.emit(WorkflowEvent::LoopIteration {
                            loop_name: lp.name.clone(),
                            iteration,
                            max_iterations: lp.max_iterations,
                        });
                        for child in &lp.body {
                            if let Flow::Escalated { by } = self.execute(child, store, stats, true).await? {
                                stop = StopReason::EscalatedBy(by);
                                break 'iterations;
                            }
                        }
                    }

                    tracing::info!(loop_name = %lp.name, iterations, stop = %stop, "loop stopped");
                    self.emit(WorkflowEvent::LoopStopped {
                        loop_name: lp.name.clone(),
                        iterations,
                        stop: stop.clone(),
                    });
                    let exhausted = stop == StopReason::MaxIterationsReached;
                    stats.loops.push(LoopReport {
                        name: lp.name.clone(),
                        iterations,
                        stop,
                    });

                    if exhausted && lp.on_exhausted == ExhaustionPolicy::Escalate && in_loop {
                        Ok(Flow::Escalated { by: lp.name.clone() })
                    } else {
                        Ok(Flow::Continue)
                    }
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentOutcome};
    use crate::workflow::{LoopBuilder, SequenceBuilder};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    /// 向未声明的键写入
    struct Rogue {
        keys: Vec<String>,
    }

    #[async_trait]
    impl Agent for Rogue {
        fn name(&self) -> &str {
            "Rogue"
        }

        fn output_keys(&self) -> &[String] {
            &self.keys
        }

        async fn invoke(&self, _store: &StateStore) -> Result<AgentOutcome, RunError> {
            Ok(AgentOutcome::output("mine", 1).with_output("yours", 2))
        }
    }

    /// 每次都 escalate
    struct Quitter {
        keys: Vec<String>,
    }

    #[async_trait]
    impl Agent for Quitter {
        fn name(&self) -> &str {
            "Quitter"
        }

        fn output_keys(&self) -> &[String] {
            &self.keys
        }

        async fn invoke(&self, _store: &StateStore) -> Result<AgentOutcome, RunError> {
            Ok(AgentOutcome::output("said", "bye").with_escalation())
        }
    }

    #[tokio::test]
    async fn test_undeclared_output_aborts_without_partial_write() {
        let rogue: Arc<dyn Agent> = Arc::new(Rogue {
            keys: vec!["mine".to_string()],
        });
        let runner = WorkflowRunner::new(rogue).unwrap();
        let mut store = StateStore::new();
        let err = runner.run(&mut store).await.unwrap_err();
        assert!(matches!(err, RunError::UndeclaredOutput { ref key, .. } if key == "yours"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_top_level_escalation_is_ignored() {
        let quitter: Arc<dyn Agent> = Arc::new(Quitter {
            keys: vec!["said".to_string()],
        });
        let tail: Arc<dyn Agent> = Arc::new(Rogue {
            keys: vec!["mine".to_string(), "yours".to_string()],
        });
        let root = SequenceBuilder::new("Top")
            .agent(quitter)
            .agent(tail)
            .build()
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = WorkflowRunner::new(root).unwrap().with_events(tx);
        let mut store = StateStore::new();
        let report = runner.run(&mut store).await.unwrap();

        assert_eq!(report.invocations, 2);
        assert_eq!(store.get("said"), Some(&json!("bye")));
        assert_eq!(store.get("yours"), Some(&json!(2)));

        let mut ignored = false;
        while let Ok(event) = rx.try_recv() {
            if event == (WorkflowEvent::EscalationIgnored { agent: "Quitter".to_string() }) {
                ignored = true;
            }
        }
        assert!(ignored);
    }

    #[tokio::test]
    async fn test_escalating_loop_stops_after_first_iteration() {
        let quitter: Arc<dyn Agent> = Arc::new(Quitter {
            keys: vec!["said".to_string()],
        });
        let lp = LoopBuilder::new("L", 5).agent(quitter).build().unwrap();
        let report = WorkflowRunner::new(lp)
            .unwrap()
            .run(&mut StateStore::new())
            .await
            .unwrap();
        assert_eq!(
            report.loops,
            vec![LoopReport {
                name: "L".to_string(),
                iterations: 1,
                stop: StopReason::EscalatedBy("Quitter".to_string()),
            }]
        );
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = WorkflowEvent::LoopStopped {
            loop_name: "DevelopmentLoop".to_string(),
            iterations: 2,
            stop: StopReason::EscalatedBy("TesterAgent".to_string()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "loop_stopped");
        assert_eq!(value["stop"]["kind"], "escalated_by");
        assert_eq!(value["stop"]["agent"], "TesterAgent");
    }
}
