//! Web 应用开发流水线
//!
//! WebApplicationDevelopmentPipeline = Sequence[
//!   InitialDeveloperAgent,
//!   DevelopmentLoop = Loop[TesterAgent, ProjectRefinerAgent],
//!   InteractiveSession = Loop[UserInterfaceAgent, FeatureDeveloperAgent, DevelopmentLoop],
//! ]
//!
//! 两处 DevelopmentLoop 共享同一组 Agent；进程表与文件沙箱由所有 Agent 共享，生命周期归调用方。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{Agent, ExitVocabulary, HumanCheckpoint, HumanInput, ReasoningAgent};
use crate::config::AppConfig;
use crate::core::StateStore;
use crate::reasoning::ReasoningUnit;
use crate::tools::{
    filesystem_provider, process_provider, ProcessTable, ToolFilter, ToolGateway, ToolProvider,
};
use crate::workflow::{LoopBuilder, Sequence, SequenceBuilder, WorkflowError};

pub const PIPELINE_NAME: &str = "WebApplicationDevelopmentPipeline";
pub const DEVELOPMENT_LOOP: &str = "DevelopmentLoop";
pub const INTERACTIVE_SESSION: &str = "InteractiveSession";

pub const STATE_REQUIREMENT: &str = "requirement";
pub const STATE_USER_REQUEST: &str = "user_request";
pub const STATE_CURRENT_PROJECT: &str = "current_project";
pub const STATE_TEST_RESULTS: &str = "test_results";

/// TesterAgent 判定全部通过时输出的固定短语
pub const COMPLETION_PHRASE: &str = "All tests passed successfully.";

const PROCESS_TOOLS: [&str; 7] = [
    "start_process",
    "interact_with_process",
    "read_process_output",
    "force_terminate",
    "list_sessions",
    "list_processes",
    "kill_process",
];

const INITIAL_DEVELOPER_PROMPT: &str = r#"You are a Flutter web application developer creating the initial project.
1. Pick a project name and create the project with: flutter create <project_name>
2. Design the main functions of the software.
3. Write the first version of the project in the new folder according to the requirement below.

Requirement:
{requirement}

Output only the absolute project folder path and a short project description."#;

const TESTER_PROMPT: &str = r#"You are a web application tester reviewing the project for functionality and quality.

Project to test:
{current_project}

Initial requirement:
{requirement}

Latest user request:
{user_request}

Task:
1. Record every feature to be tested and its status.
2. If all features have been tested and nothing new remains, you MUST call the 'exit_loop' tool.
3. Otherwise pick one feature, prioritising untested or newly requested ones, and define how to test it.
4. Run the project from its folder (flutter run -d web-server --web-port 8080) and exercise the feature.
5. If a test fails, output an issues report for the developer. If everything passes, output exactly "All tests passed successfully."

Output only the test results / issues report or the completion phrase."#;

const PROJECT_REFINER_PROMPT: &str = r#"You are a web application developer refining the project based on test results.

Current project:
{current_project}

Test results / issues:
{test_results}

Task:
Analyse the test results and modify the project files to fix the reported problems.
If the test results are exactly "All tests passed successfully." change nothing.

Do not add explanations. Output only the project path."#;

const FEATURE_DEVELOPER_PROMPT: &str = r#"You are a Flutter web developer.

Current project:
{current_project}

User request:
{user_request}

Task:
Implement the user's request by modifying project files or running commands.
Use the available tools to explore the code and apply changes.

Output the project path."#;

/// 组装好的流水线与需要由调用方回收的共享资源
pub struct Pipeline {
    pub root: Sequence,
    pub process_table: Arc<ProcessTable>,
}

/// 优先读取 `<dir>/<agent>.txt`，不存在时用内置提示词
pub fn load_prompt(dir: &Path, agent: &str, default: &str) -> String {
    let path = dir.join(format!("{}.txt", agent));
    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => {
            tracing::info!(agent = %agent, path = %path.display(), "using prompt override");
            text
        }
        _ => default.to_string(),
    }
}

/// 初始黑板：requirement 与空的 user_request
pub fn initial_state(requirement: &str) -> StateStore {
    StateStore::seeded([
        (STATE_REQUIREMENT, requirement),
        (STATE_USER_REQUEST, ""),
    ])
}

pub fn build_pipeline(
    cfg: &AppConfig,
    reasoner: Arc<dyn ReasoningUnit>,
    human: Arc<dyn HumanInput>,
) -> Result<Pipeline, WorkflowError> {
    let workspace = cfg.app.workspace();
    let prompts = cfg.app.prompts();
    let process_cfg = &cfg.tools.process;
    let fs_cfg = &cfg.tools.filesystem;

    let process_table = Arc::new(
        ProcessTable::new(
            process_cfg.allowed_commands.clone(),
            Duration::from_millis(process_cfg.settle_ms),
        )
        .with_working_dir(&workspace)
        .with_max_output(process_cfg.max_output_chars),
    );
    let process: Arc<dyn ToolProvider> = Arc::new(process_provider(
        process_table.clone(),
        Duration::from_secs(process_cfg.dev_timeout_secs),
    ));
    let filesystem: Arc<dyn ToolProvider> = Arc::new(filesystem_provider(
        &workspace,
        Duration::from_secs(fs_cfg.dev_timeout_secs),
    ));

    let dev_gateway = || {
        ToolGateway::new()
            .bind(process.clone(), ToolFilter::only(PROCESS_TOOLS))
            .bind(filesystem.clone(), ToolFilter::All)
    };

    let reasoning_agent = |name: &str, default_prompt: &str, output_key: &str, gateway: ToolGateway| {
        ReasoningAgent::new(
            name,
            load_prompt(&prompts, name, default_prompt),
            output_key,
            reasoner.clone(),
        )
        .with_gateway(gateway)
        .with_max_tool_rounds(cfg.tools.max_tool_rounds)
    };

    let initial_developer: Arc<dyn Agent> = Arc::new(
        reasoning_agent(
            "InitialDeveloperAgent",
            INITIAL_DEVELOPER_PROMPT,
            STATE_CURRENT_PROJECT,
            dev_gateway(),
        )
        .with_description("Creates the initial project implementation based on the requirement."),
    );

    let tester: Arc<dyn Agent> = Arc::new(
        reasoning_agent(
            "TesterAgent",
            TESTER_PROMPT,
            STATE_TEST_RESULTS,
            ToolGateway::new()
                .bind_with_timeout(
                    process.clone(),
                    ToolFilter::only(PROCESS_TOOLS),
                    Duration::from_secs(process_cfg.test_timeout_secs),
                )
                .with_escalation(),
        )
        .with_description("Tests the current project and reports issues, or signals completion."),
    );

    let refiner: Arc<dyn Agent> = Arc::new(
        reasoning_agent(
            "ProjectRefinerAgent",
            PROJECT_REFINER_PROMPT,
            STATE_CURRENT_PROJECT,
            ToolGateway::new().bind_with_timeout(
                filesystem.clone(),
                ToolFilter::All,
                Duration::from_secs(fs_cfg.refine_timeout_secs),
            ),
        )
        .with_description("Refines the project based on test results."),
    );

    let user_interface: Arc<dyn Agent> = Arc::new(
        HumanCheckpoint::new(
            "UserInterfaceAgent",
            STATE_USER_REQUEST,
            cfg.human.prompt.clone(),
            human,
        )
        .with_vocabulary(ExitVocabulary::new(&cfg.human.exit_words)),
    );

    let feature_developer: Arc<dyn Agent> = Arc::new(
        reasoning_agent(
            "FeatureDeveloperAgent",
            FEATURE_DEVELOPER_PROMPT,
            STATE_CURRENT_PROJECT,
            dev_gateway(),
        )
        .with_description("Implements new features based on the user request."),
    );

    let development_loop = LoopBuilder::new(DEVELOPMENT_LOOP, cfg.loops.stabilize_max_iterations)
        .agent(tester)
        .agent(refiner)
        .on_exhausted(cfg.loops.on_stabilize_exhausted)
        .build()?;

    let interactive_session = LoopBuilder::new(INTERACTIVE_SESSION, cfg.loops.session_max_iterations)
        .agent(user_interface)
        .agent(feature_developer)
        .step(development_loop.clone())
        .build()?;

    let root = SequenceBuilder::new(PIPELINE_NAME)
        .agent(initial_developer)
        .step(development_loop)
        .step(interactive_session)
        .build()?;

    Ok(Pipeline {
        root,
        process_table,
    })
}
