//! 执行状态：每次 run 一份的显式可变记录
//!
//! 由 Orchestrator 持有并沿调用链传递，不做全局共享；Checkpoint 保存它的克隆，
//! SessionStore::resume 从事件日志重建它。

use serde::{Deserialize, Serialize};

use crate::core::ToolResult;

/// run 的当前裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunVerdict {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub run_id: String,
    /// 当前生效的 Plan 版本（0 表示尚未规划）
    pub plan_revision: u32,
    /// 当前 Plan 中下一个待执行 Step 的下标
    pub current_step: usize,
    /// 按分派顺序累积的结果（跨重新规划保留）
    pub results: Vec<ToolResult>,
    pub verdict: RunVerdict,
    /// 是否分派过有副作用的调用
    pub side_effects_applied: bool,
}

impl ExecutionState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            plan_revision: 0,
            current_step: 0,
            results: Vec::new(),
            verdict: RunVerdict::Pending,
            side_effects_applied: false,
        }
    }

    /// 新 Plan 整体替换旧 Plan，从第一个 Step 重新开始
    pub fn begin_plan(&mut self, revision: u32) {
        self.plan_revision = revision;
        self.current_step = 0;
    }

    pub fn record_result(&mut self, result: ToolResult) {
        self.results.push(result);
    }

    pub fn complete_step(&mut self, index: usize) {
        self.current_step = index + 1;
    }

    pub fn mark_side_effect(&mut self) {
        self.side_effects_applied = true;
    }

    pub fn finish(&mut self, verdict: RunVerdict) {
        self.verdict = verdict;
    }

    pub fn is_finished(&self) -> bool {
        self.verdict != RunVerdict::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCallId;

    #[test]
    fn test_replan_resets_step_keeps_results() {
        let mut state = ExecutionState::new("run-1");
        state.begin_plan(1);
        state.record_result(ToolResult::success(ToolCallId(1), "ok"));
        state.complete_step(0);
        assert_eq!(state.current_step, 1);

        state.begin_plan(2);
        assert_eq!(state.current_step, 0);
        assert_eq!(state.plan_revision, 2);
        assert_eq!(state.results.len(), 1);
        assert!(!state.is_finished());

        state.finish(RunVerdict::Failed);
        assert!(state.is_finished());
    }
}
