//! ai-ide 命令行入口
//!
//! 无参数进入 REPL；`--multi --goal` / `--e2e --goal [--no-commit]` 执行一次后按结果设置退出码。

use std::path::PathBuf;
use std::sync::Arc;

use ai_ide::config::load_config;
use ai_ide::core::{
    create_llm_from_config, exit_code, resolve_workspace, CommitPolicy, OrchestratorBuilder, RunMode,
    SessionSupervisor,
};
use ai_ide::llm::{LlmClient, MockLlmClient};
use ai_ide::observability;
use ai_ide::repl::{run_with_interrupt, stdin_lines, LineApprover, Repl};
use ai_ide::session::SessionStore;
use anyhow::Context;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "ai-ide",
    version,
    about = "Terminal-first AI coding assistant that plans and executes multi-step tasks"
)]
struct Cli {
    /// Planner / Executor / Verifier run; never commits
    #[arg(long, requires = "goal", conflicts_with = "e2e")]
    multi: bool,

    /// End-to-end run that may edit, execute and commit
    #[arg(long, requires = "goal")]
    e2e: bool,

    /// Goal for a one-shot run
    #[arg(long)]
    goal: Option<String>,

    /// With --e2e: leave changes uncommitted
    #[arg(long, requires = "e2e")]
    no_commit: bool,

    /// Extra configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Workspace root (defaults to app.workspace_root or the current directory)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Use the offline mock gateway instead of Azure OpenAI
    #[arg(long)]
    mock: bool,

    /// Continue a persisted session (requires app.session_dir)
    #[arg(long, value_name = "SESSION_ID")]
    resume: Option<String>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code::USAGE
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return Ok(if e.use_stderr() { exit_code::USAGE } else { exit_code::SUCCESS });
        }
    };
    observability::init(cli.verbose);

    let cfg = load_config(cli.config.clone()).context("failed to load configuration")?;
    let workspace = resolve_workspace(&cfg, cli.workspace.clone());
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("cannot create workspace {}", workspace.display()))?;
    tracing::info!(workspace = %workspace.display(), "workspace resolved");

    let llm: Arc<dyn LlmClient> = if cli.mock {
        tracing::warn!("using offline mock gateway");
        Arc::new(MockLlmClient)
    } else {
        match create_llm_from_config(&cfg) {
            Some(llm) => llm,
            None => {
                eprintln!(
                    "LLM gateway not configured: set AZURE_OAI_ENDPOINT, AZURE_OAI_KEY and \
                     AZURE_OAI_DEPLOYMENT (or pass --mock)"
                );
                return Ok(exit_code::GATEWAY_UNREACHABLE);
            }
        }
    };

    let input = stdin_lines();
    let mut builder = OrchestratorBuilder::new(cfg.clone(), &workspace, llm)
        .with_approver(Arc::new(LineApprover::new(input.clone())));
    let mut resumed = None;
    if let Some(id) = &cli.resume {
        let dir = cfg
            .app
            .session_dir
            .clone()
            .context("--resume requires app.session_dir to be configured")?;
        let (store, state) = SessionStore::resume(&dir, id).with_context(|| format!("cannot resume session {id}"))?;
        tracing::info!(
            session_id = %id,
            run_id = %state.run_id,
            verdict = ?state.verdict,
            step = state.current_step,
            "session resumed"
        );
        builder = builder.with_session(store);
        resumed = Some(state);
    }
    let orchestrator = Arc::new(builder.build().context("failed to open session store")?);
    if let Some(state) = resumed {
        if let Some(diagnostic) = orchestrator.close_interrupted(&state).await {
            println!("previous run {} did not finish: {diagnostic}", state.run_id);
        }
        let prior = orchestrator.prior_runs().await;
        if !prior.is_empty() {
            println!("resumed with {} earlier run(s) as context", prior.len());
        }
    }
    let supervisor = Arc::new(SessionSupervisor::new());

    let one_shot = match cli.goal {
        Some(goal) if cli.multi => Some((goal, RunMode::Multi, CommitPolicy::NoCommit)),
        Some(goal) if cli.e2e => {
            let policy = if cli.no_commit {
                CommitPolicy::NoCommit
            } else {
                CommitPolicy::AutoCommit
            };
            Some((goal, RunMode::E2e, policy))
        }
        Some(goal) => Some((goal, RunMode::Single, cfg.app.repl_commit_policy)),
        None => None,
    };

    let code = match one_shot {
        Some((goal, mode, policy)) => {
            let outcome = run_with_interrupt(&orchestrator, &supervisor, &goal, mode, policy).await;
            print!("{outcome}");
            outcome.exit_code()
        }
        None => {
            Repl::new(orchestrator, supervisor, input, cfg.app.repl_commit_policy)
                .run()
                .await
        }
    };
    Ok(code)
}
