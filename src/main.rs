//! TrainWreck CLI
//!
//! 入口：初始化日志、加载配置、创建 LLM 客户端 / 工具路由 / 历史库，运行反馈循环并打印摘要。
//! 只有启动期错误（仓库路径、凭据、provider）返回非零退出码。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trainwreck::agent::{ControlLoop, Executor, LoopConfig, Planner};
use trainwreck::config::load_config;
use trainwreck::core::{AgentError, RouterCleanup, ShutdownCoordinator, ShutdownManager};
use trainwreck::llm::make_llm_client;
use trainwreck::mcp::ToolRouter;
use trainwreck::memory::{InMemoryStepStore, SqliteStepStore, StepStore};

#[derive(Parser)]
#[command(name = "trainwreck", version, about = "Autonomous plan / execute / reflect coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the feedback loop against a repository
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// What the agent should achieve
    #[arg(long)]
    goal: String,

    /// LLM provider (openai, deepseek, ollama, lmstudio, vllm, localai, llamacpp, jan,
    /// koboldcpp, oobabooga, hf_tgi, abacus, mock)
    #[arg(long, env = "MODEL_PROVIDER")]
    model: Option<String>,

    /// Repository to work in
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Maximum number of iterations
    #[arg(long)]
    max_iters: Option<usize>,

    /// Launch command of an extra MCP tool server (registered as "default")
    #[arg(long)]
    mcp_server: Option<String>,

    /// Extra TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep step history in memory only
    #[arg(long)]
    no_persist: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖；写 stderr，stdout 只留摘要
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.clone()).context("Failed to load config")?;

    if !args.repo.is_dir() {
        return Err(AgentError::InvalidRepository(args.repo.clone()).into());
    }
    let repo = args
        .repo
        .canonicalize()
        .map_err(|e| AgentError::io(&args.repo, e))?;

    let provider = args.model.clone().unwrap_or_else(|| config.llm.provider.clone());
    let llm = make_llm_client(&provider, &config.llm)?;

    let router = Arc::new(ToolRouter::from_config(&config.mcp).await);
    if let Some(launch) = &args.mcp_server {
        if let Err(e) = router.add_peer_command("default", launch).await {
            tracing::warn!("MCP server not available: {}", e);
        }
    }
    tracing::info!("{}", router.tools_summary());

    let store: Arc<dyn StepStore> = if args.no_persist {
        Arc::new(InMemoryStepStore::new())
    } else {
        let run_id = uuid::Uuid::new_v4().to_string();
        let db_path = repo.join(&config.agent.db_file);
        match SqliteStepStore::open(&db_path, run_id) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(path = %db_path.display(), "history store unavailable, keeping steps in memory: {}", e);
                Arc::new(InMemoryStepStore::new())
            }
        }
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::for_peer_grace(config.mcp.terminate_grace());
    coordinator.register(RouterCleanup::new(Arc::clone(&router)));

    let planner = Planner::new(llm)
        .with_history_window(config.agent.history_window)
        .with_preferred_shell(config.tools.shell);
    let executor = Executor::new(&repo, &config.tools).with_router(Arc::clone(&router));
    let loop_config = LoopConfig::from(&config.agent);
    let control = ControlLoop::new(planner, executor)
        .with_store(store)
        .with_config(loop_config)
        .with_cancel_token(shutdown.token());

    let max_iterations = args.max_iters.unwrap_or(config.agent.max_iterations);
    println!("Goal: {}", args.goal);
    println!("Repository: {}", repo.display());
    println!("Provider: {}", provider);

    let report = control.run_report(&args.goal, max_iterations).await;

    for step in &report.history {
        println!(
            "[{}] {} -> {} (score: {:.2})",
            step.iteration, step.description, step.outcome, step.score
        );
    }
    println!("\nCompleted {} iterations ({:?})", report.history.len(), report.stop);
    if let Some(reason) = shutdown.reason() {
        tracing::info!(reason = ?reason, "run interrupted");
    }
    println!(
        "Successful steps: {}",
        report.successful_steps(loop_config.success_threshold)
    );
    let (prompt_tokens, completion_tokens, total_tokens) = control.planner().token_usage();
    if total_tokens > 0 {
        tracing::info!(prompt_tokens, completion_tokens, total_tokens, "token usage");
    }

    coordinator.run_cleanup().await;
    Ok(())
}
