//! Mock LLM 客户端（离线试运行与测试用，无需 API）
//!
//! 从不请求工具，直接以纯文本回答，内容引用最后一条 User 消息的首行。

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.lines().next())
            .unwrap_or("(no input)");
        Ok(format!("Mock result for: {}", last_user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_in_plain_text() {
        let out = MockLlmClient
            .complete(&[Message::system("sys"), Message::user("build it\nmore")])
            .await
            .unwrap();
        assert_eq!(out, "Mock result for: build it");
        assert!(!out.trim_start().starts_with('{'));
    }
}
