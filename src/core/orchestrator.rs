//! 编排器：主控循环
//!
//! 一次 run 的流程：Planner 产出 Plan -> 按顺序执行 Step（Step 内调用严格串行）-> 可选 Verifier 校验
//! -> 按提交策略最终化。工具失败进入修复循环，Step / 校验失败进入重新规划，均有上限；
//! 终止失败或取消时，若有副作用调用真正执行过，用最早的 Checkpoint 回滚工作区。所有事件追加到 SessionStore。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agents::{
    render_transcript, Executor, ExecutorDecision, Planner, RepairContext, RoleContext, RoleError, Verifier,
};
use crate::config::OrchestratorSection;
use crate::core::{
    Checkpoint, CommitDisposition, CommitPolicy, ExecutionState, Failure, Goal, Plan, ProposedCall,
    RecoveryAction, RecoveryEngine, RollbackError, RollbackReport, RoleKind, RunError, RunMode,
    RunOutcome, RunStatus, RunVerdict, SideEffect, Step, StepId, ToolCall, ToolCallId, ToolFailureKind,
    ToolResult, WorkspaceSnapshot,
};
use crate::llm::{GatewayError, Message};
use crate::memory::{PriorRun, RunCarryover, WorkingMemory};
use crate::session::{SessionEvent, SessionStore};
use crate::tools::ToolExecutor;
use crate::vcs::{CommitCollaborator, CommitError};

/// `ask` 策略下的提交确认
#[async_trait]
pub trait CommitApprover: Send + Sync {
    async fn approve(&self, summary: &str) -> bool;
}

/// 固定答复（非交互环境与测试）
#[derive(Debug, Clone, Copy)]
pub struct FixedApprover(pub bool);

#[async_trait]
impl CommitApprover for FixedApprover {
    async fn approve(&self, _summary: &str) -> bool {
        self.0
    }
}

/// 可通过重新规划恢复的挫折
#[derive(Debug, Clone)]
enum Setback {
    Planning(String),
    Step {
        step: StepId,
        call: Option<ToolCallId>,
        reason: String,
    },
    Verification(String),
}

impl Setback {
    fn describe(&self) -> String {
        match self {
            Setback::Planning(reason) => format!("planning failed: {reason}"),
            Setback::Step { step, call: Some(call), reason } => format!("step {step} failed at {call}: {reason}"),
            Setback::Step { step, call: None, reason } => format!("step {step} failed: {reason}"),
            Setback::Verification(reason) => format!("verification rejected the result: {reason}"),
        }
    }

    fn into_run_error(self, attempts: u32) -> RunError {
        match self {
            Setback::Planning(reason) => RunError::Planning { attempts, reason },
            Setback::Step { step, call, reason } => RunError::Execution { step, call, reason },
            Setback::Verification(reason) => RunError::Verification(reason),
        }
    }
}

/// 中断当前 Plan 的原因
enum Halt {
    Setback(Setback),
    Fatal(RunError),
}

impl From<RunError> for Halt {
    fn from(e: RunError) -> Self {
        Halt::Fatal(e)
    }
}

/// 单次 run 的可变上下文
struct Run {
    run_id: String,
    goal: Goal,
    mode: RunMode,
    state: ExecutionState,
    working: WorkingMemory,
    background: Vec<Message>,
    checkpoints: Vec<Checkpoint>,
    /// multi / e2e：最近一次取 checkpoint 的 (plan revision, step index)
    checkpoint_scope: Option<(u32, usize)>,
    side_effects: Vec<SideEffect>,
    /// 已记录 ToolCallIssued、尚无结果的调用
    in_flight: Vec<ToolCall>,
    answers: Vec<String>,
}

impl Run {
    fn ctx<'a>(&'a self, catalog: &'a str, max_attempts: usize) -> RoleContext<'a> {
        RoleContext {
            goal: &self.goal,
            tool_catalog: catalog,
            working: &self.working,
            background: &self.background,
            max_attempts,
        }
    }
}

pub struct Orchestrator {
    planner: Planner,
    executor: Executor,
    verifier: Verifier,
    tools: Arc<ToolExecutor>,
    committer: Arc<dyn CommitCollaborator>,
    approver: Arc<dyn CommitApprover>,
    session: Arc<Mutex<SessionStore>>,
    carryover: Mutex<RunCarryover>,
    workspace: PathBuf,
    /// 不进入快照的工作区相对路径（工作区内的会话目录）
    snapshot_excludes: Vec<PathBuf>,
    settings: OrchestratorSection,
    recovery: RecoveryEngine,
    tool_catalog: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        planner: Planner,
        executor: Executor,
        verifier: Verifier,
        tools: Arc<ToolExecutor>,
        committer: Arc<dyn CommitCollaborator>,
        approver: Arc<dyn CommitApprover>,
        session: SessionStore,
        carryover: RunCarryover,
        workspace: PathBuf,
        snapshot_excludes: Vec<PathBuf>,
        settings: OrchestratorSection,
    ) -> Self {
        let tool_catalog = tools.registry().to_schema_json();
        let recovery = RecoveryEngine::from_config(&settings);
        Self {
            planner,
            executor,
            verifier,
            tools,
            committer,
            approver,
            session: Arc::new(Mutex::new(session)),
            carryover: Mutex::new(carryover),
            workspace,
            snapshot_excludes,
            settings,
            recovery,
            tool_catalog,
        }
    }

    pub fn session(&self) -> Arc<Mutex<SessionStore>> {
        self.session.clone()
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 之前 run 的目标与结论，按发生顺序
    pub async fn prior_runs(&self) -> Vec<PriorRun> {
        self.carryover.lock().await.runs().cloned().collect()
    }

    /// 收尾 `--resume` 时发现的未结束 run：未应答的调用记为中断，追加 RunFinished 并计入背景。
    /// 快照只存在于原进程内存中，无法回滚；已结束的 run 返回 None
    pub async fn close_interrupted(&self, state: &ExecutionState) -> Option<String> {
        if state.is_finished() {
            return None;
        }
        let (goal, pending) = {
            let session = self.session.lock().await;
            let goal = session
                .run_events(&state.run_id)
                .find_map(|e| match e {
                    SessionEvent::RunStarted { goal, .. } => Some(goal.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            let pending: Vec<ToolCallId> = session
                .transcript(&state.run_id)
                .into_iter()
                .filter(|(_, result)| result.is_none())
                .map(|(call, _)| call.id)
                .collect();
            (goal, pending)
        };
        for id in pending {
            self.record(SessionEvent::ToolResultRecorded {
                run_id: state.run_id.clone(),
                result: ToolResult::failure(id, ToolFailureKind::Execution, "interrupted before completion"),
            })
            .await;
        }

        let mut diagnostic = format!(
            "interrupted at step {} of plan r{}",
            state.current_step + 1,
            state.plan_revision
        );
        if state.side_effects_applied {
            diagnostic.push_str("; workspace changes were not rolled back");
        }
        tracing::warn!(run_id = %state.run_id, diagnostic = %diagnostic, "closing interrupted run");
        self.record(SessionEvent::RunFinished {
            run_id: state.run_id.clone(),
            status: RunStatus::Failed,
            diagnostic: diagnostic.clone(),
        })
        .await;
        self.carryover.lock().await.record(PriorRun {
            goal,
            status: RunStatus::Failed,
            summary: diagnostic.clone(),
        });
        Some(diagnostic)
    }

    /// 把一个目标驱动到完成；取消与失败都体现在返回的 RunOutcome 中
    pub async fn run(
        &self,
        goal: &str,
        mode: RunMode,
        commit_policy: CommitPolicy,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let run_id = uuid::Uuid::new_v4().to_string();
        let Some(goal) = Goal::new(goal) else {
            return RunOutcome {
                run_id,
                status: RunStatus::Failed,
                answer: None,
                error: Some(RunError::InvalidInput("goal must not be empty".to_string())),
                side_effects: Vec::new(),
                rollback: None,
                commit: CommitDisposition::NotAttempted,
            };
        };
        tracing::info!(run_id = %run_id, mode = %mode, policy = ?commit_policy, "run started");

        let mut working = WorkingMemory::new();
        working.set_goal(goal.as_str());
        let background: Vec<Message> = self.carryover.lock().await.to_messages();
        let mut run = Run {
            state: ExecutionState::new(run_id.clone()),
            run_id,
            goal,
            mode,
            working,
            background,
            checkpoints: Vec::new(),
            checkpoint_scope: None,
            side_effects: Vec::new(),
            in_flight: Vec::new(),
            answers: Vec::new(),
        };
        self.record(SessionEvent::RunStarted {
            run_id: run.run_id.clone(),
            goal: run.goal.to_string(),
            mode,
            commit_policy,
        })
        .await;

        let driven = tokio::select! {
            _ = cancel.cancelled() => Err(RunError::Cancelled),
            r = self.drive(&mut run) => r,
        };

        let outcome = match driven {
            Ok(answer) => self.finalize_success(&mut run, answer, commit_policy).await,
            Err(err) => self.finalize_failure(&mut run, err).await,
        };

        self.record(SessionEvent::RunFinished {
            run_id: run.run_id.clone(),
            status: outcome.status,
            diagnostic: outcome.diagnostic(),
        })
        .await;
        self.carryover.lock().await.record(PriorRun {
            goal: run.goal.to_string(),
            status: outcome.status,
            summary: outcome.diagnostic(),
        });
        tracing::info!(run_id = %run.run_id, status = ?outcome.status, "run finished");
        outcome
    }

    /// 规划 / 执行 / 校验，失败时在上限内重新规划
    async fn drive(&self, run: &mut Run) -> Result<String, RunError> {
        let mut replans = 0;
        let mut revision = 0;
        let mut failure: Option<String> = None;
        loop {
            revision += 1;
            let setback = match self.attempt_plan(run, revision, failure.as_deref()).await {
                Ok(answer) => return Ok(answer),
                Err(Halt::Fatal(e)) => return Err(e),
                Err(Halt::Setback(s)) => s,
            };
            let reason = setback.describe();
            run.working.add_failure(reason.clone());
            let next = match setback {
                Setback::Verification(_) => Failure::VerificationRejected { replans },
                _ => Failure::StepFailed { replans },
            };
            match self.recovery.handle(next) {
                RecoveryAction::Replan => {
                    replans += 1;
                    tracing::warn!(run_id = %run.run_id, replans, reason = %reason, "replanning");
                    failure = Some(reason);
                }
                _ => {
                    tracing::error!(run_id = %run.run_id, reason = %reason, "replan budget exhausted");
                    return Err(setback.into_run_error(replans + 1));
                }
            }
        }
    }

    async fn attempt_plan(&self, run: &mut Run, revision: u32, failure: Option<&str>) -> Result<String, Halt> {
        let plan = self
            .planner
            .produce_plan(&run.ctx(&self.tool_catalog, self.settings.max_attempts_in_prompt), revision, failure)
            .await
            .map_err(|e| self.role_halt(e, Setback::Planning))?;
        self.record(SessionEvent::PlanProduced {
            run_id: run.run_id.clone(),
            plan: plan.clone(),
        })
        .await;
        run.state.begin_plan(plan.revision);
        run.answers.clear();

        let mut index = 0;
        while index < plan.steps.len() {
            let group = self.parallel_group(&plan, index);
            if group > 1 {
                self.execute_parallel(run, &plan, index, group).await?;
                index += group;
            } else {
                let step = &plan.steps[index];
                let result = self.run_step(run, step, index).await;
                self.close_step(run, step, index, result).await?;
                index += 1;
            }
        }

        if run.mode.is_multi_agent() || self.settings.verify_single {
            self.verify(run, &plan).await?;
        }

        let mut answer = format!("completed {} step(s) of plan r{}", plan.steps.len(), plan.revision);
        if !run.answers.is_empty() {
            answer = format!("{}\n{}", answer, run.answers.join("\n"));
        }
        Ok(answer)
    }

    /// 从 start 开始，可并行分派的 independent 步骤个数（每步恰好一个只读调用）
    fn parallel_group(&self, plan: &Plan, start: usize) -> usize {
        if !self.settings.parallel_independent_steps {
            return 1;
        }
        plan.steps[start..]
            .iter()
            .take_while(|s| {
                s.independent
                    && s.tool_calls.len() == 1
                    && self.tools.is_side_effecting(&s.tool_calls[0].tool) == Some(false)
            })
            .count()
            .max(1)
    }

    async fn close_step(&self, run: &mut Run, step: &Step, index: usize, result: Result<(), Halt>) -> Result<(), Halt> {
        match result {
            Ok(()) => {
                run.state.complete_step(index);
                self.record(SessionEvent::StepCompleted {
                    run_id: run.run_id.clone(),
                    step_id: step.id.clone(),
                    index,
                })
                .await;
                tracing::info!(run_id = %run.run_id, step_id = %step.id, "step completed");
                Ok(())
            }
            Err(Halt::Setback(setback)) => {
                let reason = setback.describe();
                tracing::warn!(run_id = %run.run_id, step_id = %step.id, reason = %reason, "step failed");
                self.record(SessionEvent::StepFailed {
                    run_id: run.run_id.clone(),
                    step_id: step.id.clone(),
                    reason,
                })
                .await;
                Err(Halt::Setback(setback))
            }
            Err(fatal) => Err(fatal),
        }
    }

    /// 先执行 Planner 预置的调用；没有预置调用时由 Executor 逐个提出，直到它声明完成
    async fn run_step(&self, run: &mut Run, step: &Step, index: usize) -> Result<(), Halt> {
        let mut log: Vec<(ToolCall, Option<ToolResult>)> = Vec::new();
        if !step.tool_calls.is_empty() {
            for proposed in &step.tool_calls {
                self.dispatch_with_repair(run, step, index, proposed.clone(), RoleKind::Planner, &mut log)
                    .await?;
            }
            return Ok(());
        }

        for _ in 0..self.settings.max_step_calls {
            let progress = render_transcript(&log);
            let decision = self
                .executor
                .propose_tool_call(
                    &run.ctx(&self.tool_catalog, self.settings.max_attempts_in_prompt),
                    step,
                    &progress,
                    None,
                )
                .await
                .map_err(|e| {
                    self.role_halt(e, |reason| Setback::Step {
                        step: step.id.clone(),
                        call: None,
                        reason,
                    })
                })?;
            match decision {
                ExecutorDecision::Done(text) => {
                    run.answers.push(text);
                    return Ok(());
                }
                ExecutorDecision::Call(proposed) => {
                    self.dispatch_with_repair(run, step, index, proposed, RoleKind::Executor, &mut log)
                        .await?
                }
            }
        }
        Err(Halt::Setback(Setback::Step {
            step: step.id.clone(),
            call: None,
            reason: format!("step did not finish within {} tool calls", self.settings.max_step_calls),
        }))
    }

    /// 相邻 independent 只读步骤并发执行；结果按发出顺序记录，Step 仍按顺序完成
    async fn execute_parallel(&self, run: &mut Run, plan: &Plan, start: usize, len: usize) -> Result<(), Halt> {
        let steps = &plan.steps[start..start + len];
        let mut issued = Vec::with_capacity(len);
        for (offset, step) in steps.iter().enumerate() {
            let call = self
                .issue(run, step, start + offset, step.tool_calls[0].clone(), RoleKind::Planner, 0, None)
                .await?;
            issued.push(call);
        }
        tracing::info!(run_id = %run.run_id, steps = len, "dispatching independent read-only steps concurrently");

        let outputs = join_all(issued.iter().map(|c| self.tools.execute(&c.tool, c.args.clone()))).await;

        let mut executed = Vec::with_capacity(len);
        for (call, output) in issued.into_iter().zip(outputs) {
            let result = match output {
                Ok(out) => ToolResult::success(call.id, out),
                Err(e) => ToolResult::failure(call.id, e.kind(), e.to_string()),
            };
            self.record_result(run, &call, result.clone()).await;
            executed.push((call, result));
        }

        for (offset, (call, result)) in executed.into_iter().enumerate() {
            let index = start + offset;
            let step = &plan.steps[index];
            let outcome = if result.is_success() {
                Ok(())
            } else {
                let mut log = vec![(call.clone(), Some(result.clone()))];
                self.repair(run, step, index, call, result, &mut log).await
            };
            self.close_step(run, step, index, outcome).await?;
        }
        Ok(())
    }

    async fn dispatch_with_repair(
        &self,
        run: &mut Run,
        step: &Step,
        index: usize,
        proposed: ProposedCall,
        requester: RoleKind,
        log: &mut Vec<(ToolCall, Option<ToolResult>)>,
    ) -> Result<(), Halt> {
        let call = self.issue(run, step, index, proposed, requester, 0, None).await?;
        let result = self.dispatch(run, &call).await;
        log.push((call.clone(), Some(result.clone())));
        if result.is_success() {
            return Ok(());
        }
        self.repair(run, step, index, call, result, log).await
    }

    /// 修复循环：每次重试都是新的 ToolCall（retry_of 指向被替代的调用），次数不超过 max_tool_retries
    async fn repair(
        &self,
        run: &mut Run,
        step: &Step,
        index: usize,
        mut call: ToolCall,
        mut result: ToolResult,
        log: &mut Vec<(ToolCall, Option<ToolResult>)>,
    ) -> Result<(), Halt> {
        let mut retries = 0;
        loop {
            let kind = result.failure.unwrap_or(ToolFailureKind::Execution);
            let (next, requester) = match self.recovery.handle(Failure::Tool { kind, retries }) {
                RecoveryAction::Retry => (ProposedCall::new(call.tool.clone(), call.args.clone()), call.requester),
                RecoveryAction::Repair => {
                    let progress = render_transcript(log);
                    let decision = self
                        .executor
                        .propose_tool_call(
                            &run.ctx(&self.tool_catalog, self.settings.max_attempts_in_prompt),
                            step,
                            &progress,
                            Some(RepairContext {
                                failed: &call,
                                error: &result.output,
                                attempt: retries + 1,
                            }),
                        )
                        .await
                        .map_err(|e| {
                            self.role_halt(e, |reason| Setback::Step {
                                step: step.id.clone(),
                                call: Some(call.id),
                                reason,
                            })
                        })?;
                    match decision {
                        ExecutorDecision::Call(p) => (p, RoleKind::Executor),
                        ExecutorDecision::Done(_) => {
                            return Err(Halt::Setback(Setback::Step {
                                step: step.id.clone(),
                                call: Some(call.id),
                                reason: "executor gave up repairing the failed call".to_string(),
                            }))
                        }
                    }
                }
                _ => {
                    let reason = if retries == 0 {
                        format!("{} failed: {}", call.tool, result.output)
                    } else {
                        format!("{} failed after {} retries: {}", call.tool, retries, result.output)
                    };
                    return Err(Halt::Setback(Setback::Step {
                        step: step.id.clone(),
                        call: Some(call.id),
                        reason,
                    }));
                }
            };

            retries += 1;
            tracing::info!(
                run_id = %run.run_id,
                step_id = %step.id,
                tool = %next.tool,
                attempt = retries,
                retry_of = %call.id,
                "retrying tool call"
            );
            call = self
                .issue(run, step, index, next, requester, retries, Some(call.id))
                .await?;
            result = self.dispatch(run, &call).await;
            log.push((call.clone(), Some(result.clone())));
            if result.is_success() {
                return Ok(());
            }
        }
    }

    /// 记录一次新调用并登记为进行中；有副作用时先确保已取 checkpoint
    #[allow(clippy::too_many_arguments)]
    async fn issue(
        &self,
        run: &mut Run,
        step: &Step,
        index: usize,
        proposed: ProposedCall,
        requester: RoleKind,
        attempt: u32,
        retry_of: Option<ToolCallId>,
    ) -> Result<ToolCall, Halt> {
        let side_effecting = self.tools.is_side_effecting(&proposed.tool).unwrap_or(false);
        if side_effecting {
            self.ensure_checkpoint(run, step, index).await?;
        }

        let call = {
            let mut session = self.session.lock().await;
            let call = ToolCall {
                id: session.next_call_id(),
                tool: proposed.tool,
                args: proposed.args,
                requester,
                step_id: step.id.clone(),
                attempt,
                retry_of,
                side_effecting,
            };
            if let Err(e) = session.append(SessionEvent::ToolCallIssued {
                run_id: run.run_id.clone(),
                call: call.clone(),
            }) {
                tracing::error!(error = %e, "failed to append session event");
            }
            call
        };
        run.in_flight.push(call.clone());
        tracing::debug!(run_id = %run.run_id, step_id = %step.id, call = %call.id, tool = %call.tool, attempt, "tool call issued");
        Ok(call)
    }

    async fn dispatch(&self, run: &mut Run, call: &ToolCall) -> ToolResult {
        let result = match self.tools.execute(&call.tool, call.args.clone()).await {
            Ok(out) => ToolResult::success(call.id, out),
            Err(e) => ToolResult::failure(call.id, e.kind(), e.to_string()),
        };
        self.record_result(run, call, result.clone()).await;
        result
    }

    /// 记录结果；有副作用的调用只有真正执行到工具时才算改动过工作区
    async fn record_result(&self, run: &mut Run, call: &ToolCall, result: ToolResult) {
        run.in_flight.retain(|c| c.id != call.id);
        let first_line = result.output.lines().next().unwrap_or("");
        run.working.add_attempt(format!(
            "{} {} -> {}: {}",
            call.id,
            call.tool,
            if result.is_success() { "ok" } else { "failed" },
            first_line
        ));
        if call.side_effecting && result.reached_tool() {
            Self::note_side_effect(run, call, result.is_success());
        }
        run.state.record_result(result.clone());
        self.record(SessionEvent::ToolResultRecorded {
            run_id: run.run_id.clone(),
            result,
        })
        .await;
    }

    fn note_side_effect(run: &mut Run, call: &ToolCall, succeeded: bool) {
        run.state.mark_side_effect();
        run.side_effects.push(SideEffect {
            call_id: call.id,
            step_id: call.step_id.clone(),
            tool: call.tool.clone(),
            args: call.args.clone(),
            succeeded,
        });
    }

    /// single：整次 run 一个；multi / e2e：每个 Step 一个。
    /// 只有第一个 checkpoint 复制工作区，之后的只记录状态
    async fn ensure_checkpoint(&self, run: &mut Run, step: &Step, index: usize) -> Result<(), Halt> {
        let needed = match run.mode {
            RunMode::Single => run.checkpoints.is_empty(),
            RunMode::Multi | RunMode::E2e => run.checkpoint_scope != Some((run.state.plan_revision, index)),
        };
        if !needed {
            return Ok(());
        }

        let id = run.checkpoints.len() as u32 + 1;
        let step_id = run.mode.is_multi_agent().then(|| step.id.clone());
        let checkpoint = if run.checkpoints.is_empty() {
            let root = self.workspace.clone();
            let excludes = self.snapshot_excludes.clone();
            let snapshot = tokio::task::spawn_blocking(move || WorkspaceSnapshot::capture_excluding(&root, &excludes))
                .await
                .map_err(|e| RollbackError::Capture(e.to_string()))
                .and_then(|r| r)
                .map_err(|e| {
                    Halt::Fatal(RunError::Execution {
                        step: step.id.clone(),
                        call: None,
                        reason: format!("cannot take checkpoint: {e}"),
                    })
                })?;
            tracing::info!(run_id = %run.run_id, checkpoint = id, files = snapshot.file_count(), "checkpoint taken");
            Checkpoint::new(id, step_id.clone(), run.state.clone(), snapshot)
        } else {
            tracing::debug!(run_id = %run.run_id, checkpoint = id, "checkpoint marker");
            Checkpoint::marker(id, step_id.clone(), run.state.clone())
        };
        run.checkpoints.push(checkpoint);
        run.checkpoint_scope = Some((run.state.plan_revision, index));
        self.record(SessionEvent::CheckpointTaken {
            run_id: run.run_id.clone(),
            checkpoint_id: id,
            step_id,
        })
        .await;
        Ok(())
    }

    async fn verify(&self, run: &mut Run, plan: &Plan) -> Result<(), Halt> {
        let transcript = {
            let session = self.session.lock().await;
            render_transcript(&session.transcript(&run.run_id))
        };
        let judgment = self
            .verifier
            .verify_result(
                &run.ctx(&self.tool_catalog, self.settings.max_attempts_in_prompt),
                plan,
                &transcript,
            )
            .await
            .map_err(|e| self.role_halt(e, Setback::Verification))?;
        self.record(SessionEvent::VerificationRecorded {
            run_id: run.run_id.clone(),
            pass: judgment.pass,
            rationale: judgment.rationale.clone(),
        })
        .await;
        if judgment.pass {
            Ok(())
        } else {
            Err(Halt::Setback(Setback::Verification(judgment.rationale)))
        }
    }

    fn role_halt(&self, err: RoleError, setback: impl FnOnce(String) -> Setback) -> Halt {
        tracing::warn!(role = %err.role(), error = %err, "role call failed");
        match self.recovery.handle(Failure::Role(&err)) {
            RecoveryAction::Abort => Halt::Fatal(match err {
                RoleError::Gateway { source, .. } => RunError::Gateway(source),
                RoleError::ModelTimeout { .. } => RunError::Gateway(GatewayError::Timeout),
                other => RunError::Planning {
                    attempts: 1,
                    reason: other.to_string(),
                },
            }),
            _ => Halt::Setback(setback(err.to_string())),
        }
    }

    async fn finalize_success(&self, run: &mut Run, answer: String, policy: CommitPolicy) -> RunOutcome {
        let commit = match policy {
            CommitPolicy::NoCommit => Ok(CommitDisposition::Skipped),
            CommitPolicy::AutoCommit => self.commit(run).await,
            CommitPolicy::Ask => {
                let summary = self.change_summary(run);
                if self.approver.approve(&summary).await {
                    self.commit(run).await
                } else {
                    tracing::info!(run_id = %run.run_id, "commit declined");
                    Ok(CommitDisposition::Declined)
                }
            }
        };

        match commit {
            Ok(disposition) => {
                run.state.finish(RunVerdict::Succeeded);
                RunOutcome {
                    run_id: run.run_id.clone(),
                    status: RunStatus::Succeeded,
                    answer: Some(answer),
                    error: None,
                    side_effects: run.side_effects.clone(),
                    rollback: None,
                    commit: disposition,
                }
            }
            // 提交失败不回滚：工作区保留最后一次成功的（未提交）状态
            Err(e) => {
                run.state.finish(RunVerdict::Failed);
                RunOutcome {
                    run_id: run.run_id.clone(),
                    status: RunStatus::Failed,
                    answer: Some(answer),
                    error: Some(RunError::Commit(e)),
                    side_effects: run.side_effects.clone(),
                    rollback: None,
                    commit: CommitDisposition::NotAttempted,
                }
            }
        }
    }

    fn change_summary(&self, run: &Run) -> String {
        let applied: Vec<String> = run
            .side_effects
            .iter()
            .filter(|e| e.succeeded)
            .map(|e| format!("  {} {}", e.tool, crate::tools::args_preview(&e.args)))
            .collect();
        if applied.is_empty() {
            format!("Goal: {}\n(no side-effecting tool calls)", run.goal)
        } else {
            format!("Goal: {}\n{}", run.goal, applied.join("\n"))
        }
    }

    async fn commit(&self, run: &Run) -> Result<CommitDisposition, CommitError> {
        let subject: String = run.goal.as_str().lines().next().unwrap_or("").chars().take(72).collect();
        let message = format!("ai-ide: {subject}");
        let (disposition, event) = match self.committer.commit(&message).await {
            Ok(id) => {
                tracing::info!(run_id = %run.run_id, commit = %id, "changes committed");
                (Ok(CommitDisposition::Committed(id.clone())), (Some(id.0), None))
            }
            Err(CommitError::NothingToCommit) => {
                tracing::info!(run_id = %run.run_id, "nothing to commit");
                (Ok(CommitDisposition::Unchanged), (None, None))
            }
            Err(e) => {
                tracing::error!(run_id = %run.run_id, error = %e, "commit failed");
                let msg = e.to_string();
                (Err(e), (None, Some(msg)))
            }
        };
        self.record(SessionEvent::CommitRecorded {
            run_id: run.run_id.clone(),
            commit_id: event.0,
            error: event.1,
        })
        .await;
        disposition
    }

    /// 终止失败或取消：补记未完成调用的结果，有副作用时用最早的 checkpoint 回滚。
    /// 被取消的有副作用调用可能已部分执行，按已改动处理
    async fn finalize_failure(&self, run: &mut Run, err: RunError) -> RunOutcome {
        tracing::warn!(run_id = %run.run_id, error = %err, "run failed");
        for call in std::mem::take(&mut run.in_flight) {
            if call.side_effecting {
                Self::note_side_effect(run, &call, false);
            }
            let result = ToolResult::failure(call.id, ToolFailureKind::Execution, "cancelled before completion");
            run.state.record_result(result.clone());
            self.record(SessionEvent::ToolResultRecorded {
                run_id: run.run_id.clone(),
                result,
            })
            .await;
        }
        run.state.finish(RunVerdict::Failed);

        let earliest = std::mem::take(&mut run.checkpoints)
            .into_iter()
            .find(|c| c.snapshot().is_some());
        let rollback = match earliest {
            Some(checkpoint) if run.state.side_effects_applied => {
                let report = tokio::task::spawn_blocking(move || checkpoint.rollback())
                    .await
                    .map(Option::unwrap_or_default)
                    .unwrap_or_else(|e| RollbackReport {
                        attempted: true,
                        error: Some(RollbackError::Aborted(e.to_string())),
                        ..RollbackReport::default()
                    });
                self.record(SessionEvent::RollbackRecorded {
                    run_id: run.run_id.clone(),
                    report: report.clone(),
                })
                .await;
                Some(report)
            }
            _ => None,
        };

        RunOutcome {
            run_id: run.run_id.clone(),
            status: RunStatus::Failed,
            answer: None,
            error: Some(err),
            side_effects: run.side_effects.clone(),
            rollback,
            commit: CommitDisposition::NotAttempted,
        }
    }

    async fn record(&self, event: SessionEvent) {
        if let Err(e) = self.session.lock().await.append(event) {
            tracing::error!(error = %e, "failed to append session event");
        }
    }
}
