//! 工具提供方
//!
//! 提供方是长期存活、有状态、可被多个 Agent 共享的能力句柄（Arc），生命周期归运行驱动者所有。
//! 每个提供方声明一个默认超时，网关对每次调用施加超时。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ToolDescriptor, ToolRegistry};

#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 未显式指定时单次调用使用的超时
    fn default_timeout(&self) -> Duration;

    fn tools(&self) -> Vec<ToolDescriptor>;

    fn has_tool(&self, tool: &str) -> bool {
        self.tools().iter().any(|t| t.name == tool)
    }

    async fn call(&self, tool: &str, args: Value) -> Result<String, String>;
}

/// 以 ToolRegistry 为后端的提供方（进程族、文件族都由它承载）
pub struct RegistryProvider {
    name: String,
    registry: ToolRegistry,
    timeout: Duration,
}

impl RegistryProvider {
    pub fn new(name: impl Into<String>, registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            registry,
            timeout,
        }
    }
}

#[async_trait]
impl ToolProvider for RegistryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    fn has_tool(&self, tool: &str) -> bool {
        self.registry.contains(tool)
    }

    async fn call(&self, tool: &str, args: Value) -> Result<String, String> {
        self.registry.execute(tool, args).await
    }
}
