//! Run 结果与进程退出码

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{RollbackReport, RunError, StepId, ToolCallId};
use crate::vcs::CommitId;

/// 进程退出码
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const USAGE: i32 = 1;
    pub const PLAN_FAILED: i32 = 2;
    pub const EXECUTION_FAILED: i32 = 3;
    pub const GATEWAY_UNREACHABLE: i32 = 4;
    pub const CANCELLED: i32 = 130;
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Gateway(_) => exit_code::GATEWAY_UNREACHABLE,
            RunError::Planning { .. } | RunError::Verification(_) => exit_code::PLAN_FAILED,
            RunError::Execution { .. } | RunError::Commit(_) => exit_code::EXECUTION_FAILED,
            RunError::Cancelled => exit_code::CANCELLED,
            RunError::InvalidInput(_) => exit_code::USAGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// 已分派的有副作用调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideEffect {
    pub call_id: ToolCallId,
    pub step_id: StepId,
    pub tool: String,
    pub args: serde_json::Value,
    pub succeeded: bool,
}

/// 最终化阶段对提交的处理
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitDisposition {
    /// 未到最终化（失败 / 取消）或无需提交
    NotAttempted,
    /// no-commit 策略
    Skipped,
    /// ask 策略下用户拒绝
    Declined,
    /// 提交协作者报告没有可提交的改动
    Unchanged,
    Committed(CommitId),
}

/// 返回给 REPL / CLI 的唯一结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    /// 成功时的最终回答
    pub answer: Option<String>,
    pub error: Option<RunError>,
    pub side_effects: Vec<SideEffect>,
    pub rollback: Option<RollbackReport>,
    pub commit: CommitDisposition,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn exit_code(&self) -> i32 {
        match &self.error {
            None => exit_code::SUCCESS,
            Some(e) => e.exit_code(),
        }
    }

    pub fn rolled_back(&self) -> bool {
        self.rollback.as_ref().map(|r| r.succeeded()).unwrap_or(false)
    }

    /// 人类可读的诊断（成功时为最终回答）；回滚失败时附带回滚错误
    pub fn diagnostic(&self) -> String {
        let rollback_error = self.rollback.as_ref().and_then(|r| r.error.as_ref());
        match (&self.error, rollback_error) {
            (None, _) => self.answer.clone().unwrap_or_else(|| "done".to_string()),
            (Some(e), None) => e.to_string(),
            (Some(e), Some(rb)) => format!("{e}; rollback failed: {rb}"),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        writeln!(f, "run {} {}: {}", self.run_id, status, self.diagnostic())?;
        if !self.side_effects.is_empty() {
            writeln!(f, "side effects:")?;
            for effect in &self.side_effects {
                writeln!(
                    f,
                    "  [{}] {} {} {}",
                    effect.step_id,
                    effect.call_id,
                    effect.tool,
                    if effect.succeeded { "applied" } else { "failed" }
                )?;
            }
        }
        if let Some(report) = &self.rollback {
            match &report.error {
                None => writeln!(
                    f,
                    "rolled back: {} restored, {} removed",
                    report.restored.len(),
                    report.removed.len()
                )?,
                Some(e) => writeln!(f, "ROLLBACK FAILED, workspace may be inconsistent: {e}")?,
            }
        }
        match &self.commit {
            CommitDisposition::Committed(id) => writeln!(f, "committed {id}")?,
            CommitDisposition::Declined => writeln!(f, "changes left uncommitted")?,
            CommitDisposition::Unchanged => writeln!(f, "nothing to commit")?,
            CommitDisposition::Skipped | CommitDisposition::NotAttempted => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GatewayError;

    fn failed(err: RunError) -> RunOutcome {
        RunOutcome {
            run_id: "r".into(),
            status: RunStatus::Failed,
            answer: None,
            error: Some(err),
            side_effects: vec![],
            rollback: None,
            commit: CommitDisposition::NotAttempted,
        }
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        assert_eq!(failed(RunError::Gateway(GatewayError::Timeout)).exit_code(), 4);
        assert_eq!(
            failed(RunError::Planning { attempts: 3, reason: "x".into() }).exit_code(),
            2
        );
        assert_eq!(failed(RunError::Verification("x".into())).exit_code(), 2);
        assert_eq!(
            failed(RunError::Execution {
                step: StepId("s1".into()),
                call: None,
                reason: "x".into()
            })
            .exit_code(),
            3
        );
        assert_eq!(failed(RunError::Cancelled).exit_code(), 130);
    }

    #[test]
    fn test_display_reports_rollback_failure() {
        let mut outcome = failed(RunError::Cancelled);
        outcome.rollback = Some(RollbackReport {
            attempted: true,
            error: Some(crate::core::RollbackError::Capture("disk".into())),
            ..RollbackReport::default()
        });
        let text = outcome.to_string();
        assert!(text.contains("ROLLBACK FAILED"));
        assert_eq!(
            outcome.diagnostic(),
            "run cancelled; rollback failed: failed to capture workspace snapshot: disk"
        );
        assert!(!outcome.rolled_back());
    }
}
