//! 人工检查点
//!
//! 挂起运行等待操作员输入：退出词（忽略大小写、去掉首尾空白后比较）转为 escalate 且不写状态；
//! 其余输入原样写入输出键。输入流结束（EOF）按退出处理，通道 I/O 错误中止运行。

use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

use crate::agent::{Agent, AgentOutcome};
use crate::core::{RunError, StateStore};

/// 人工输入通道；Ok(None) 表示输入已关闭
#[async_trait]
pub trait HumanInput: Send + Sync {
    async fn read_line(&self, prompt: &str) -> io::Result<Option<String>>;
}

/// 终端标准输入
pub struct ConsoleInput {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleInput {
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for ConsoleInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HumanInput for ConsoleInput {
    async fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("\n>>> [User Input Needed] {}\n>>> ", prompt).as_bytes())
            .await?;
        stdout.flush().await?;
        self.lines.lock().await.next_line().await
    }
}

/// 预置回复（测试 / 无人值守运行）；用完后视为 EOF
#[derive(Default)]
pub struct ScriptedInput {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedInput {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 已展示过的提示（按顺序）
    pub fn prompts_seen(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HumanInput for ScriptedInput {
    async fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "scripted input poisoned"))?;
        Ok(replies.pop_front())
    }
}

/// 退出词集合，统一存小写
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitVocabulary(BTreeSet<String>);

impl ExitVocabulary {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        )
    }

    pub fn matches(&self, input: &str) -> bool {
        self.0.contains(&input.trim().to_lowercase())
    }
}

impl Default for ExitVocabulary {
    fn default() -> Self {
        Self::new(["exit", "quit", "done"])
    }
}

pub struct HumanCheckpoint {
    name: String,
    output_keys: Vec<String>,
    prompt: String,
    vocabulary: ExitVocabulary,
    channel: Arc<dyn HumanInput>,
}

impl HumanCheckpoint {
    pub fn new(
        name: impl Into<String>,
        output_key: impl Into<String>,
        prompt: impl Into<String>,
        channel: Arc<dyn HumanInput>,
    ) -> Self {
        Self {
            name: name.into(),
            output_keys: vec![output_key.into()],
            prompt: prompt.into(),
            vocabulary: ExitVocabulary::default(),
            channel,
        }
    }

    pub fn with_vocabulary(mut self, vocabulary: ExitVocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }
}

#[async_trait]
impl Agent for HumanCheckpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    async fn invoke(&self, _store: &StateStore) -> Result<AgentOutcome, RunError> {
        match self.channel.read_line(&self.prompt).await {
            Ok(Some(line)) if self.vocabulary.matches(&line) => {
                tracing::info!(agent = %self.name, "operator requested exit");
                Ok(AgentOutcome::escalate())
            }
            Ok(Some(line)) => Ok(AgentOutcome::output(
                self.output_keys[0].clone(),
                Value::String(line),
            )),
            Ok(None) => {
                tracing::info!(agent = %self.name, "input closed, treating as exit");
                Ok(AgentOutcome::escalate())
            }
            Err(e) => Err(RunError::HumanInput {
                agent: self.name.clone(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenInput;

    #[async_trait]
    impl HumanInput for BrokenInput {
        async fn read_line(&self, _prompt: &str) -> io::Result<Option<String>> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal gone"))
        }
    }

    fn checkpoint(channel: Arc<dyn HumanInput>) -> HumanCheckpoint {
        HumanCheckpoint::new("UserInterfaceAgent", "user_request", "Next?", channel)
    }

    #[test]
    fn test_vocabulary_is_case_insensitive() {
        let vocab = ExitVocabulary::default();
        assert!(vocab.matches("QUIT"));
        assert!(vocab.matches("  Done \n"));
        assert!(!vocab.matches("quit now"));
        assert!(!vocab.matches(""));
    }

    #[tokio::test]
    async fn test_exit_word_escalates_without_output() {
        let input = Arc::new(ScriptedInput::new(["Exit"]));
        let outcome = checkpoint(input.clone()).invoke(&StateStore::new()).await.unwrap();
        assert!(outcome.escalate);
        assert!(outcome.outputs.is_empty());
        assert_eq!(input.prompts_seen(), vec!["Next?".to_string()]);
    }

    #[tokio::test]
    async fn test_request_written_verbatim() {
        let input = Arc::new(ScriptedInput::new(["  add a dark mode toggle "]));
        let outcome = checkpoint(input).invoke(&StateStore::new()).await.unwrap();
        assert!(!outcome.escalate);
        assert_eq!(
            outcome.outputs,
            vec![(
                "user_request".to_string(),
                Value::String("  add a dark mode toggle ".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_eof_counts_as_exit() {
        let outcome = checkpoint(Arc::new(ScriptedInput::default()))
            .invoke(&StateStore::new())
            .await
            .unwrap();
        assert!(outcome.escalate);
    }

    #[tokio::test]
    async fn test_channel_error_aborts() {
        let err = checkpoint(Arc::new(BrokenInput))
            .invoke(&StateStore::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::HumanInput { .. }));
    }

    #[tokio::test]
    async fn test_custom_vocabulary() {
        let cp = checkpoint(Arc::new(ScriptedInput::new(["bye"])))
            .with_vocabulary(ExitVocabulary::new(["Bye"]));
        assert!(cp.invoke(&StateStore::new()).await.unwrap().escalate);
    }
}
