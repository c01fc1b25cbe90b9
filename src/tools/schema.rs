//! 工具调用 JSON Schema（schemars 生成）
//!
//! 拼入 LlmReasoner 的 system prompt，约束模型输出合法的 tool call。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 与 parse_llm_output 解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 read_file、start_process、exit_loop
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, serde_json::Value>,
}

pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_both_fields() {
        let schema = tool_call_schema_json();
        assert!(schema.contains("\"tool\""));
        assert!(schema.contains("\"args\""));
    }
}
