//! devloop 入口
//!
//! 加载配置、初始化日志，组装开发流水线并在终端上运行一次；
//! Ctrl+C / SIGTERM 取消运行，结束后回收仍存活的子进程会话并打印最终状态。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use devloop::agent::ConsoleInput;
use devloop::config::load_config;
use devloop::core::{ShutdownCoordinator, ShutdownManager};
use devloop::llm::create_llm_from_config;
use devloop::pipeline::{build_pipeline, initial_state};
use devloop::reasoning::LlmReasoner;
use devloop::tools::ProcessCleanup;
use devloop::workflow::{WorkflowEvent, WorkflowRunner};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("DEVLOOP_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    devloop::observability::init();

    let requirement = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let requirement = if requirement.trim().is_empty() {
        cfg.run
            .requirement
            .clone()
            .context("No requirement given: pass it as an argument or set [run] requirement")?
    } else {
        requirement
    };

    let workspace = cfg.app.workspace();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;

    let llm = create_llm_from_config(&cfg);
    let reasoner = Arc::new(LlmReasoner::new(
        llm.clone(),
        Duration::from_secs(cfg.llm.timeouts.request),
    ));
    let pipeline = build_pipeline(&cfg, reasoner, Arc::new(ConsoleInput::new()))
        .context("Failed to assemble pipeline")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let event_log = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                tracing::debug!(event = %json, "workflow event");
            }
        }
    });

    let runner = WorkflowRunner::new(pipeline.root)?
        .with_events(event_tx)
        .with_cancel_token(shutdown.token());
    let mut store = initial_state(&requirement);
    let result = runner.run(&mut store).await;
    drop(runner);
    let _ = event_log.await;

    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(10));
    coordinator.register(Arc::new(ProcessCleanup::new(pipeline.process_table)));
    coordinator.run_cleanup().await;

    let (prompt_tokens, completion_tokens, total_tokens) = llm.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "token usage");

    println!("\n=== Final state ===");
    println!("{}", serde_json::to_string_pretty(&store.snapshot())?);

    let report = result?;
    println!("\n=== Run report ===");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
