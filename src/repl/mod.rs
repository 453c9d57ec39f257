//! 交互式 REPL：逐行读取目标并交给 Orchestrator
//!
//! - 普通输入：single 模式，使用配置中的提交策略（默认 ask）
//! - `:multi <goal>`：multi 模式，不提交
//! - `:e2e <goal>`：e2e 模式，使用配置中的提交策略
//! - `:history`：打印本会话事件日志；`:quit` 退出
//!
//! 运行中按 Ctrl+C 只取消当前 run（触发回滚），REPL 继续。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::core::{CommitApprover, CommitPolicy, Orchestrator, RunMode, RunOutcome, SessionSupervisor};

/// REPL 与提交确认共享的输入行
pub type SharedLines<R> = Arc<Mutex<Lines<R>>>;

pub fn stdin_lines() -> SharedLines<BufReader<Stdin>> {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

/// 从共享输入读取 `Commit changes? [y/N]` 的回答；EOF 视为拒绝
pub struct LineApprover<R> {
    input: SharedLines<R>,
}

impl<R> LineApprover<R> {
    pub fn new(input: SharedLines<R>) -> Self {
        Self { input }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> CommitApprover for LineApprover<R> {
    async fn approve(&self, summary: &str) -> bool {
        println!("{summary}");
        println!("Commit changes? [y/N]");
        let line = self.input.lock().await.next_line().await.ok().flatten();
        matches!(
            line.as_deref().map(|l| l.trim().to_lowercase()),
            Some(ref answer) if answer == "y" || answer == "yes"
        )
    }
}

/// 运行一个目标；期间 Ctrl+C 取消该 run 并等待它完成回滚
pub async fn run_with_interrupt(
    orchestrator: &Orchestrator,
    supervisor: &SessionSupervisor,
    goal: &str,
    mode: RunMode,
    policy: CommitPolicy,
) -> RunOutcome {
    let token = supervisor.begin_run();
    let run = orchestrator.run(goal, mode, policy, token.clone());
    tokio::pin!(run);
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            Ok(()) = tokio::signal::ctrl_c(), if !token.is_cancelled() => {
                eprintln!("^C cancelling run...");
                supervisor.cancel_run();
            }
        }
    };
    supervisor.end_run();
    outcome
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Run(RunMode, &'a str),
    History,
    Help,
    Quit,
    Empty,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with(':') {
        return Command::Run(RunMode::Single, line);
    }
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match cmd {
        ":multi" => Command::Run(RunMode::Multi, rest.trim()),
        ":e2e" => Command::Run(RunMode::E2e, rest.trim()),
        ":history" => Command::History,
        ":help" => Command::Help,
        ":quit" | ":q" | ":exit" => Command::Quit,
        other => Command::Unknown(other),
    }
}

const HELP: &str = "\
<goal>            plan and execute in single mode
:multi <goal>     planner / executor / verifier, never commits
:e2e <goal>       end-to-end run, commit per configured policy
:history          show this session's event log
:quit             exit";

pub struct Repl<R> {
    orchestrator: Arc<Orchestrator>,
    supervisor: Arc<SessionSupervisor>,
    input: SharedLines<R>,
    commit_policy: CommitPolicy,
}

impl<R: AsyncBufRead + Unpin + Send> Repl<R> {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        supervisor: Arc<SessionSupervisor>,
        input: SharedLines<R>,
        commit_policy: CommitPolicy,
    ) -> Self {
        Self {
            orchestrator,
            supervisor,
            input,
            commit_policy,
        }
    }

    /// 主循环；返回最后一次 run 的退出码（未运行过则为 0）
    pub async fn run(&self) -> i32 {
        println!("ai-ide interactive session (:help for commands)");
        let mut last_code = 0;
        loop {
            print!("> ");
            let _ = std::io::Write::flush(&mut std::io::stdout());
            let line = match self.input.lock().await.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read input");
                    break;
                }
            };

            match parse_command(&line) {
                Command::Empty => {}
                Command::Quit => break,
                Command::Help => println!("{HELP}"),
                Command::Unknown(cmd) => println!("unknown command {cmd}, try :help"),
                Command::History => self.print_history().await,
                Command::Run(_, "") => println!("a goal is required"),
                Command::Run(mode, goal) => {
                    let policy = match mode {
                        RunMode::Multi => CommitPolicy::NoCommit,
                        RunMode::Single | RunMode::E2e => self.commit_policy,
                    };
                    let outcome =
                        run_with_interrupt(&self.orchestrator, &self.supervisor, goal, mode, policy).await;
                    print!("{outcome}");
                    last_code = outcome.exit_code();
                }
            }
        }
        self.supervisor.cancel();
        last_code
    }

    async fn print_history(&self) {
        let session = self.orchestrator.session();
        let store = session.lock().await;
        if store.is_empty() {
            println!("(no events yet)");
            return;
        }
        for entry in store.history() {
            println!(
                "#{:<4} {} {}",
                entry.seq,
                entry.at.format("%H:%M:%S"),
                entry.event.summary()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::OrchestratorBuilder;
    use crate::llm::MockLlmClient;
    use crate::vcs::RecordingCommitter;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("  add fn "), Command::Run(RunMode::Single, "add fn"));
        assert_eq!(parse_command(":multi fix it"), Command::Run(RunMode::Multi, "fix it"));
        assert_eq!(parse_command(":e2e"), Command::Run(RunMode::E2e, ""));
        assert_eq!(parse_command(":history"), Command::History);
        assert_eq!(parse_command(":q"), Command::Quit);
        assert_eq!(parse_command(":nope x"), Command::Unknown(":nope"));
        assert_eq!(parse_command("   "), Command::Empty);
    }

    #[tokio::test]
    async fn test_repl_runs_goal_and_answers_commit_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let input: SharedLines<&[u8]> = Arc::new(Mutex::new((&b"list files\ny\n:history\n:quit\n"[..]).lines()));
        let committer = Arc::new(RecordingCommitter::new());
        let orch = OrchestratorBuilder::new(AppConfig::default(), dir.path(), Arc::new(MockLlmClient))
            .with_committer(committer.clone())
            .with_approver(Arc::new(LineApprover::new(input.clone())))
            .build()
            .unwrap();
        let repl = Repl::new(
            Arc::new(orch),
            Arc::new(SessionSupervisor::new()),
            input,
            CommitPolicy::Ask,
        );
        assert_eq!(repl.run().await, 0);
        assert_eq!(committer.invocations(), 1);
    }
}
