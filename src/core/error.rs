//! Run 级错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据失败类型决定 Retry / Repair / CorrectiveRetry / Replan / Abort。
//! 调用方（REPL / CLI）只会看到 RunOutcome 中的 RunError，不会看到原始传输错误。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{StepId, ToolCallId};
use crate::llm::GatewayError;
use crate::vcs::CommitError;

/// 一次 run 的终止原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// Gateway 重试耗尽（或鉴权失败）
    #[error("LLM gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Planner 在重新规划次数内始终给不出合法计划
    #[error("planning failed after {attempts} attempt(s): {reason}")]
    Planning { attempts: u32, reason: String },

    /// Step 失败且重新规划次数耗尽
    #[error("step {step} failed: {reason}")]
    Execution {
        step: StepId,
        call: Option<ToolCallId>,
        reason: String,
    },

    /// Verifier 持续拒绝且重新规划次数耗尽
    #[error("verification failed: {0}")]
    Verification(String),

    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// 回滚失败
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackError {
    #[error("failed to capture workspace snapshot: {0}")]
    Capture(String),

    #[error("failed to restore {}: {message}", .path.display())]
    Restore { path: PathBuf, message: String },

    #[error("failed to remove {}: {message}", .path.display())]
    Remove { path: PathBuf, message: String },

    #[error("rollback task aborted: {0}")]
    Aborted(String),
}

/// 恢复引擎根据失败类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 原样重新分派同一调用（记为新的 ToolCall）
    Retry,
    /// 带失败详情请求 Executor 给出修正后的调用
    Repair,
    /// 追加纠错提示后重新请求同一角色
    CorrectiveRetry(String),
    /// 当前 Plan 作废，带失败上下文重新规划
    Replan,
    /// 终止当前 run
    Abort,
}
