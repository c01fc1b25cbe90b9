//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DEVLOOP__*` 覆盖（双下划线表示嵌套，如 `DEVLOOP__LOOPS__STABILIZE_MAX_ITERATIONS=5`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::workflow::ExhaustionPolicy;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub run: RunSection,
    pub llm: LlmSection,
    pub loops: LoopsSection,
    pub human: HumanSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 目标项目所在目录（文件族提供方的沙箱根、进程族的工作目录），未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 提示词覆盖目录，未设置时用 config/prompts
    pub prompts_dir: Option<PathBuf>,
}

impl AppSection {
    pub fn workspace(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    pub fn prompts(&self) -> PathBuf {
        self.prompts_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("config/prompts"))
    }
}

/// [run] 段：状态黑板的初始值
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunSection {
    /// 顶层需求文本；命令行参数优先
    pub requirement: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: ModelOverride,
    #[serde(default)]
    pub openai: ModelOverride,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: ModelOverride::default(),
            openai: ModelOverride::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelOverride {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次推理请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [loops] 段：各循环的迭代上限与耗尽策略
#[derive(Debug, Clone, Deserialize)]
pub struct LoopsSection {
    #[serde(default = "default_stabilize_max")]
    pub stabilize_max_iterations: u32,
    #[serde(default = "default_session_max")]
    pub session_max_iterations: u32,
    /// 内层稳定循环达到上限时：continue（默认）或 escalate（让交互会话循环也停止）
    #[serde(default)]
    pub on_stabilize_exhausted: ExhaustionPolicy,
}

impl Default for LoopsSection {
    fn default() -> Self {
        Self {
            stabilize_max_iterations: default_stabilize_max(),
            session_max_iterations: default_session_max(),
            on_stabilize_exhausted: ExhaustionPolicy::default(),
        }
    }
}

fn default_stabilize_max() -> u32 {
    20
}

fn default_session_max() -> u32 {
    100
}

/// [human] 段：人工检查点
#[derive(Debug, Clone, Deserialize)]
pub struct HumanSection {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// 退出词（大小写不敏感）
    #[serde(default = "default_exit_words")]
    pub exit_words: Vec<String>,
}

impl Default for HumanSection {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            exit_words: default_exit_words(),
        }
    }
}

fn default_prompt() -> String {
    "Please provide your feedback or next requirement: ".to_string()
}

fn default_exit_words() -> Vec<String> {
    vec!["exit".into(), "quit".into(), "done".into()]
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次 Agent 调用内「推理 → 工具」轮数上限
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default)]
    pub process: ProcessSection,
    #[serde(default)]
    pub filesystem: FilesystemSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            process: ProcessSection::default(),
            filesystem: FilesystemSection::default(),
        }
    }
}

fn default_max_tool_rounds() -> usize {
    20
}

/// [tools.process] 段：命令执行族
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSection {
    /// 开发类 Agent 的调用超时（秒）
    #[serde(default = "default_process_dev_timeout")]
    pub dev_timeout_secs: u64,
    /// 测试类 Agent 的调用超时（秒）
    #[serde(default = "default_process_test_timeout")]
    pub test_timeout_secs: u64,
    /// 启动 / 输入后等待多久再收集输出（毫秒）
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// 允许的命令名（每个 ; | & 分段的首词）；为空表示不限
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    /// 单次返回的进程输出上限（字符），超出保留末尾并标记 ...[truncated]
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            dev_timeout_secs: default_process_dev_timeout(),
            test_timeout_secs: default_process_test_timeout(),
            settle_ms: default_settle_ms(),
            allowed_commands: default_allowed_commands(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

fn default_process_dev_timeout() -> u64 {
    14
}

fn default_process_test_timeout() -> u64 {
    15
}

fn default_settle_ms() -> u64 {
    1500
}

fn default_max_output_chars() -> usize {
    crate::tools::process::DEFAULT_MAX_OUTPUT_CHARS
}

fn default_allowed_commands() -> Vec<String> {
    [
        "flutter", "dart", "ls", "cat", "grep", "find", "head", "tail", "wc", "mkdir", "cp",
        "mv", "git", "npm", "npx", "node",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// [tools.filesystem] 段：文件族
#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemSection {
    #[serde(default = "default_fs_dev_timeout")]
    pub dev_timeout_secs: u64,
    #[serde(default = "default_fs_refine_timeout")]
    pub refine_timeout_secs: u64,
}

impl Default for FilesystemSection {
    fn default() -> Self {
        Self {
            dev_timeout_secs: default_fs_dev_timeout(),
            refine_timeout_secs: default_fs_refine_timeout(),
        }
    }
}

fn default_fs_dev_timeout() -> u64 {
    7
}

fn default_fs_refine_timeout() -> u64 {
    8
}

/// 从 config 目录加载配置，环境变量 DEVLOOP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DEVLOOP__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DEVLOOP")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_bounds() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.loops.stabilize_max_iterations, 20);
        assert_eq!(cfg.loops.session_max_iterations, 100);
        assert_eq!(cfg.loops.on_stabilize_exhausted, ExhaustionPolicy::Continue);
        assert_eq!(cfg.human.exit_words, vec!["exit", "quit", "done"]);
        assert_eq!(cfg.tools.process.test_timeout_secs, 15);
        assert_eq!(cfg.tools.process.max_output_chars, 8000);
        assert_eq!(cfg.tools.filesystem.dev_timeout_secs, 7);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[loops]\nstabilize_max_iterations = 3\non_stabilize_exhausted = \"escalate\"\n\n[human]\nexit_words = [\"bye\"]\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.loops.stabilize_max_iterations, 3);
        assert_eq!(cfg.loops.session_max_iterations, 100);
        assert_eq!(cfg.loops.on_stabilize_exhausted, ExhaustionPolicy::Escalate);
        assert_eq!(cfg.human.exit_words, vec!["bye"]);
    }
}
