//! 会话存储：只追加的事件日志
//!
//! 记录 Plan / ToolCall / ToolResult 等事件，每条带单调递增的 seq 与时间戳；已写入的条目从不修改。
//! 可选以 JSONL 持久化到 `session_dir/<session_id>.jsonl`，并从日志重建最近一次 run 的 ExecutionState。

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{
    CommitPolicy, ExecutionState, Plan, RollbackReport, RunMode, RunStatus, RunVerdict, StepId,
    ToolCall, ToolCallId, ToolResult,
};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("tool call {0} was already issued")]
    DuplicateCall(ToolCallId),

    #[error("tool call {0} already has a result")]
    DuplicateResult(ToolCallId),

    #[error("result for unknown tool call {0}")]
    UnknownCall(ToolCallId),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("session {0} has no runs")]
    NoRun(String),

    #[error("corrupt session log at line {line}: {message}")]
    Corrupt { line: usize, message: String },

    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    RunStarted {
        run_id: String,
        goal: String,
        mode: RunMode,
        commit_policy: CommitPolicy,
    },
    PlanProduced {
        run_id: String,
        plan: Plan,
    },
    ToolCallIssued {
        run_id: String,
        call: ToolCall,
    },
    ToolResultRecorded {
        run_id: String,
        result: ToolResult,
    },
    StepCompleted {
        run_id: String,
        step_id: StepId,
        index: usize,
    },
    StepFailed {
        run_id: String,
        step_id: StepId,
        reason: String,
    },
    CheckpointTaken {
        run_id: String,
        checkpoint_id: u32,
        step_id: Option<StepId>,
    },
    VerificationRecorded {
        run_id: String,
        pass: bool,
        rationale: String,
    },
    RollbackRecorded {
        run_id: String,
        report: RollbackReport,
    },
    CommitRecorded {
        run_id: String,
        commit_id: Option<String>,
        error: Option<String>,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        diagnostic: String,
    },
}

impl SessionEvent {
    pub fn run_id(&self) -> &str {
        match self {
            SessionEvent::RunStarted { run_id, .. }
            | SessionEvent::PlanProduced { run_id, .. }
            | SessionEvent::ToolCallIssued { run_id, .. }
            | SessionEvent::ToolResultRecorded { run_id, .. }
            | SessionEvent::StepCompleted { run_id, .. }
            | SessionEvent::StepFailed { run_id, .. }
            | SessionEvent::CheckpointTaken { run_id, .. }
            | SessionEvent::VerificationRecorded { run_id, .. }
            | SessionEvent::RollbackRecorded { run_id, .. }
            | SessionEvent::CommitRecorded { run_id, .. }
            | SessionEvent::RunFinished { run_id, .. } => run_id,
        }
    }

    /// `:history` 中的一行摘要
    pub fn summary(&self) -> String {
        match self {
            SessionEvent::RunStarted { goal, mode, .. } => format!("run started ({mode}): {goal}"),
            SessionEvent::PlanProduced { plan, .. } => {
                format!("plan r{} with {} step(s)", plan.revision, plan.steps.len())
            }
            SessionEvent::ToolCallIssued { call, .. } => {
                format!("{} [{}] {} (attempt {})", call.id, call.step_id, call.tool, call.attempt)
            }
            SessionEvent::ToolResultRecorded { result, .. } => {
                let first = result.output.lines().next().unwrap_or("");
                format!("{} -> {:?}: {}", result.call_id, result.status, first)
            }
            SessionEvent::StepCompleted { step_id, .. } => format!("step {step_id} completed"),
            SessionEvent::StepFailed { step_id, reason, .. } => format!("step {step_id} failed: {reason}"),
            SessionEvent::CheckpointTaken { checkpoint_id, .. } => format!("checkpoint #{checkpoint_id}"),
            SessionEvent::VerificationRecorded { pass, rationale, .. } => {
                format!("verification {}: {}", if *pass { "pass" } else { "fail" }, rationale)
            }
            SessionEvent::RollbackRecorded { report, .. } => match &report.error {
                None => format!("rollback ok ({} restored, {} removed)", report.restored.len(), report.removed.len()),
                Some(e) => format!("rollback failed: {e}"),
            },
            SessionEvent::CommitRecorded { commit_id, error, .. } => match (commit_id, error) {
                (Some(id), _) => format!("committed {id}"),
                (None, Some(e)) => format!("commit failed: {e}"),
                (None, None) => "commit skipped".to_string(),
            },
            SessionEvent::RunFinished { status, diagnostic, .. } => format!("run {status:?}: {diagnostic}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: SessionEvent,
}

#[derive(Debug)]
pub struct SessionStore {
    session_id: String,
    entries: Vec<SessionEntry>,
    issued: HashSet<ToolCallId>,
    answered: HashSet<ToolCallId>,
    /// Some 时每条事件追加写入该 JSONL 文件
    path: Option<PathBuf>,
}

impl SessionStore {
    /// 仅内存会话
    pub fn in_memory() -> Self {
        Self::with_path(uuid::Uuid::new_v4().to_string(), None)
    }

    /// 新的持久化会话
    pub fn persistent(dir: &Path) -> Result<Self, SessionError> {
        std::fs::create_dir_all(dir)?;
        let id = uuid::Uuid::new_v4().to_string();
        let path = dir.join(format!("{id}.jsonl"));
        Ok(Self::with_path(id, Some(path)))
    }

    fn with_path(session_id: String, path: Option<PathBuf>) -> Self {
        Self {
            session_id,
            entries: Vec::new(),
            issued: HashSet::new(),
            answered: HashSet::new(),
            path,
        }
    }

    /// 重新加载持久化的会话，之后的事件继续追加到同一文件
    pub fn open(dir: &Path, session_id: &str) -> Result<Self, SessionError> {
        let path = dir.join(format!("{session_id}.jsonl"));
        if !path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        let mut store = Self::with_path(session_id.to_string(), None);
        for (i, line) in data.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            let entry: SessionEntry = serde_json::from_str(line).map_err(|e| SessionError::Corrupt {
                line: i + 1,
                message: e.to_string(),
            })?;
            store.check(&entry.event).map_err(|e| SessionError::Corrupt {
                line: i + 1,
                message: e.to_string(),
            })?;
            store.index(&entry.event);
            store.entries.push(entry);
        }
        store.path = Some(path);
        Ok(store)
    }

    /// 打开会话并重建最近一次 run 的执行状态
    pub fn resume(dir: &Path, session_id: &str) -> Result<(Self, ExecutionState), SessionError> {
        let store = Self::open(dir, session_id)?;
        let state = store
            .rebuild_state()
            .ok_or_else(|| SessionError::NoRun(session_id.to_string()))?;
        Ok((store, state))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn history(&self) -> &[SessionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 下一个可用的调用序号（会话内单调）
    pub fn next_call_id(&self) -> ToolCallId {
        ToolCallId(self.issued.iter().map(|c| c.0).max().unwrap_or(0) + 1)
    }

    fn check(&self, event: &SessionEvent) -> Result<(), SessionError> {
        match event {
            SessionEvent::ToolCallIssued { call, .. } if self.issued.contains(&call.id) => {
                Err(SessionError::DuplicateCall(call.id))
            }
            SessionEvent::ToolResultRecorded { result, .. } if !self.issued.contains(&result.call_id) => {
                Err(SessionError::UnknownCall(result.call_id))
            }
            SessionEvent::ToolResultRecorded { result, .. } if self.answered.contains(&result.call_id) => {
                Err(SessionError::DuplicateResult(result.call_id))
            }
            _ => Ok(()),
        }
    }

    fn index(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::ToolCallIssued { call, .. } => {
                self.issued.insert(call.id);
            }
            SessionEvent::ToolResultRecorded { result, .. } => {
                self.answered.insert(result.call_id);
            }
            _ => {}
        }
    }

    /// 追加事件；违反“一次调用至多一个结果”时拒绝。
    /// 持久化失败时事件仍保留在内存日志中，错误返回给调用方
    pub fn append(&mut self, event: SessionEvent) -> Result<u64, SessionError> {
        self.check(&event)?;
        let entry = SessionEntry {
            seq: self.entries.last().map(|e| e.seq + 1).unwrap_or(1),
            at: Utc::now(),
            event,
        };
        let seq = entry.seq;
        self.index(&entry.event);
        let line = serde_json::to_string(&entry);
        self.entries.push(entry);
        if let Some(path) = &self.path {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", line?)?;
        }
        Ok(seq)
    }

    /// 某次 run 的全部事件（按 seq）
    pub fn run_events<'a>(&'a self, run_id: &'a str) -> impl Iterator<Item = &'a SessionEvent> + 'a {
        self.entries
            .iter()
            .map(|e| &e.event)
            .filter(move |e| e.run_id() == run_id)
    }

    /// 某次 run 按发出顺序的 (调用, 结果) 记录
    pub fn transcript(&self, run_id: &str) -> Vec<(ToolCall, Option<ToolResult>)> {
        let mut out: Vec<(ToolCall, Option<ToolResult>)> = Vec::new();
        for event in self.run_events(run_id) {
            match event {
                SessionEvent::ToolCallIssued { call, .. } => out.push((call.clone(), None)),
                SessionEvent::ToolResultRecorded { result, .. } => {
                    if let Some(slot) = out.iter_mut().find(|(c, _)| c.id == result.call_id) {
                        slot.1 = Some(result.clone());
                    }
                }
                _ => {}
            }
        }
        out
    }

    pub fn plans(&self, run_id: &str) -> Vec<Plan> {
        self.run_events(run_id)
            .filter_map(|e| match e {
                SessionEvent::PlanProduced { plan, .. } => Some(plan.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_run_id(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|e| match &e.event {
            SessionEvent::RunStarted { run_id, .. } => Some(run_id.as_str()),
            _ => None,
        })
    }

    /// 从事件日志重建最近一次 run 的 ExecutionState。
    /// 有副作用的调用执行到了工具，或至今没有结果（可能已部分执行），都算改动过工作区
    pub fn rebuild_state(&self) -> Option<ExecutionState> {
        let run_id = self.last_run_id()?;
        let mut state = ExecutionState::new(run_id);
        let mut pending_effects: HashSet<ToolCallId> = HashSet::new();
        for event in self.run_events(run_id) {
            match event {
                SessionEvent::PlanProduced { plan, .. } => state.begin_plan(plan.revision),
                SessionEvent::ToolCallIssued { call, .. } if call.side_effecting => {
                    pending_effects.insert(call.id);
                }
                SessionEvent::ToolResultRecorded { result, .. } => {
                    if pending_effects.remove(&result.call_id) && result.reached_tool() {
                        state.mark_side_effect();
                    }
                    state.record_result(result.clone());
                }
                SessionEvent::StepCompleted { index, .. } => state.complete_step(*index),
                SessionEvent::RunFinished { status, .. } => state.finish(match status {
                    RunStatus::Succeeded => RunVerdict::Succeeded,
                    RunStatus::Failed => RunVerdict::Failed,
                }),
                _ => {}
            }
        }
        if !pending_effects.is_empty() {
            state.mark_side_effect();
        }
        Some(state)
    }
}
