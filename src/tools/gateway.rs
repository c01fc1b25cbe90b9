//! 工具调用网关
//!
//! 每个 Agent 持有一个网关：绑定若干提供方，每个提供方带白名单（ToolFilter）与超时。
//! call(tool, args) 先按白名单查找提供方（不在白名单则直接拒绝、不转发），再在超时内调用，
//! 超时或失败转为 ToolError；每次调用输出一条结构化审计日志（JSON）。
//! 保留工具 `exit_loop` 不转发给任何提供方，而是返回 ToolReply::Escalate。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::{ToolDescriptor, ToolProvider};

/// 保留的「结束循环」工具名
pub const ESCALATE_TOOL: &str = "exit_loop";

/// 单个提供方上允许调用的工具
#[derive(Clone, Debug)]
pub enum ToolFilter {
    All,
    Only(BTreeSet<String>),
}

impl ToolFilter {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolFilter::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn permits(&self, tool: &str) -> bool {
        match self {
            ToolFilter::All => true,
            ToolFilter::Only(names) => names.contains(tool),
        }
    }
}

struct ProviderBinding {
    provider: Arc<dyn ToolProvider>,
    filter: ToolFilter,
    timeout: Duration,
}

/// 工具调用成功时的两种结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolReply {
    Output(String),
    /// 调用了 exit_loop
    Escalate,
}

#[derive(Default)]
pub struct ToolGateway {
    bindings: Vec<ProviderBinding>,
    escalation: bool,
}

impl ToolGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定提供方，超时取提供方默认值
    pub fn bind(self, provider: Arc<dyn ToolProvider>, filter: ToolFilter) -> Self {
        let timeout = provider.default_timeout();
        self.bind_with_timeout(provider, filter, timeout)
    }

    pub fn bind_with_timeout(
        mut self,
        provider: Arc<dyn ToolProvider>,
        filter: ToolFilter,
        timeout: Duration,
    ) -> Self {
        self.bindings.push(ProviderBinding {
            provider,
            filter,
            timeout,
        });
        self
    }

    /// 允许该 Agent 调用 exit_loop
    pub fn with_escalation(mut self) -> Self {
        self.escalation = true;
        self
    }

    pub fn allows_escalation(&self) -> bool {
        self.escalation
    }

    /// 该 Agent 可见的全部工具（按绑定顺序，白名单过滤后）
    pub fn available_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .bindings
            .iter()
            .flat_map(|b| {
                b.provider
                    .tools()
                    .into_iter()
                    .filter(|t| b.filter.permits(&t.name))
                    .collect::<Vec<_>>()
            })
            .collect();
        if self.escalation {
            tools.push(ToolDescriptor {
                name: ESCALATE_TOOL.to_string(),
                description: "Call this ONLY when the work of the enclosing loop is complete; stops further iterations.".to_string(),
                parameters: serde_json::json!({"type": "object", "properties": {}, "required": []}),
            });
        }
        tools
    }

    /// 不在白名单或无提供方时拒绝（不转发）
    fn resolve(&self, tool: &str) -> Result<&ProviderBinding, ToolError> {
        self.bindings
            .iter()
            .find(|b| b.filter.permits(tool) && b.provider.has_tool(tool))
            .ok_or_else(|| {
                tracing::warn!(tool = %tool, "tool call rejected: not in allow-list");
                ToolError::NotAllowed(tool.to_string())
            })
    }

    /// 使用绑定的超时调用
    pub async fn call(&self, tool: &str, args: serde_json::Value) -> Result<ToolReply, ToolError> {
        if tool == ESCALATE_TOOL {
            return self.escalate();
        }
        let binding = self.resolve(tool)?;
        let limit = binding.timeout;
        self.dispatch(binding, tool, args, limit).await
    }

    /// 调用方显式给出本次超时
    pub async fn call_with_timeout(
        &self,
        tool: &str,
        args: serde_json::Value,
        limit: Duration,
    ) -> Result<ToolReply, ToolError> {
        if tool == ESCALATE_TOOL {
            return self.escalate();
        }
        let binding = self.resolve(tool)?;
        self.dispatch(binding, tool, args, limit).await
    }

    fn escalate(&self) -> Result<ToolReply, ToolError> {
        if self.escalation {
            tracing::info!(tool = ESCALATE_TOOL, "escalation requested");
            Ok(ToolReply::Escalate)
        } else {
            tracing::warn!(tool = ESCALATE_TOOL, "escalation not permitted for this agent");
            Err(ToolError::NotAllowed(ESCALATE_TOOL.to_string()))
        }
    }

    async fn dispatch(
        &self,
        binding: &ProviderBinding,
        tool: &str,
        args: serde_json::Value,
        limit: Duration,
    ) -> Result<ToolReply, ToolError> {
        let start = Instant::now();
        let preview = args_preview(&args);
        let result = timeout(limit, binding.provider.call(tool, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "provider": binding.provider.name(),
            "tool": tool,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "timeout_ms": limit.as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(ToolReply::Output(content)),
            Ok(Err(message)) => Err(ToolError::Failed {
                tool: tool.to_string(),
                message,
            }),
            Err(_) => Err(ToolError::Timeout {
                tool: tool.to_string(),
                timeout: limit,
            }),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{RegistryProvider, Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo text"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(args.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string())
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Never answers in time"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("disk on fire".to_string())
        }
    }

    fn provider() -> Arc<dyn ToolProvider> {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        registry.register(Sleepy);
        registry.register(Broken);
        Arc::new(RegistryProvider::new("test", registry, Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn test_call_allowed_tool() {
        let gateway = ToolGateway::new().bind(provider(), ToolFilter::All);
        let reply = gateway.call("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(reply, ToolReply::Output("hi".to_string()));
    }

    #[tokio::test]
    async fn test_filtered_tool_fails_closed() {
        let gateway = ToolGateway::new().bind(provider(), ToolFilter::only(["echo"]));
        let err = gateway.call("broken", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::NotAllowed("broken".to_string()));
        let names: Vec<String> = gateway.available_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let gateway = ToolGateway::new().bind(provider(), ToolFilter::All);
        let err = gateway.call("rm_everything", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotAllowed(_)));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_error() {
        let gateway = ToolGateway::new().bind(provider(), ToolFilter::All);
        let err = gateway.call("sleepy", json!({})).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_explicit_timeout_overrides_binding() {
        let gateway = ToolGateway::new().bind_with_timeout(
            provider(),
            ToolFilter::All,
            Duration::from_secs(30),
        );
        let err = gateway
            .call_with_timeout("sleepy", json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Timeout {
                tool: "sleepy".to_string(),
                timeout: Duration::from_millis(20)
            }
        );
    }

    #[tokio::test]
    async fn test_explicit_timeout_still_honours_filter() {
        let gateway = ToolGateway::new().bind(provider(), ToolFilter::only(["echo"]));
        let err = gateway
            .call_with_timeout("broken", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::NotAllowed("broken".to_string()));
    }

    #[tokio::test]
    async fn test_provider_failure_maps_to_failed() {
        let gateway = ToolGateway::new().bind(provider(), ToolFilter::All);
        let err = gateway.call("broken", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Failed { ref message, .. } if message == "disk on fire"));
    }

    #[tokio::test]
    async fn test_escalation_requires_permission() {
        let plain = ToolGateway::new();
        assert!(plain.call(ESCALATE_TOOL, json!({})).await.is_err());

        let escalating = ToolGateway::new().with_escalation();
        assert_eq!(
            escalating.call(ESCALATE_TOOL, json!({})).await.unwrap(),
            ToolReply::Escalate
        );
        assert!(escalating
            .available_tools()
            .iter()
            .any(|t| t.name == ESCALATE_TOOL));
    }
}
