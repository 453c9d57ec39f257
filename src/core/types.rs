//! 数据模型：Goal / Plan / Step / ToolCall / ToolResult
//!
//! Plan 一经分派不再逐步修改，重新规划时以新 Plan 整体替换；ToolCall 发出后不可变，
//! 修复循环产生的重试是新的 ToolCall（retry_of 指向被替代的调用），结果只追加不覆盖。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 用户目标：非空、发出后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal(String);

impl Goal {
    /// 去除首尾空白后为空时返回 None
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Planner + Executor，整次 run 至多一个 checkpoint
    Single,
    /// Planner + Executor + Verifier，每个 Step 至多一个 checkpoint
    Multi,
    /// 同 Multi，且面向会真正改动并提交工作区的端到端任务
    E2e,
}

impl RunMode {
    /// Multi / E2e 总是配置 Verifier，并按 Step 取 checkpoint
    pub fn is_multi_agent(self) -> bool {
        matches!(self, RunMode::Multi | RunMode::E2e)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Single => "single",
            RunMode::Multi => "multi",
            RunMode::E2e => "e2e",
        };
        f.write_str(s)
    }
}

/// 成功后对工作区改动的提交策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitPolicy {
    AutoCommit,
    NoCommit,
    Ask,
}

impl FromStr for CommitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto-commit" | "auto" => Ok(CommitPolicy::AutoCommit),
            "no-commit" | "none" => Ok(CommitPolicy::NoCommit),
            "ask" => Ok(CommitPolicy::Ask),
            other => Err(format!("unknown commit policy: {other}")),
        }
    }
}

/// 发起请求的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Planner,
    Executor,
    Verifier,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleKind::Planner => "planner",
            RoleKind::Executor => "executor",
            RoleKind::Verifier => "verifier",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 会话内单调递增的调用序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolCallId(pub u64);

impl fmt::Display for ToolCallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Planner / Executor 提出但尚未分派的调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ProposedCall {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// Plan 中的一个工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub intent: String,
    #[serde(default)]
    pub tool_calls: Vec<ProposedCall>,
    /// Planner 显式标记与相邻步骤无依赖，可并行分派只读调用
    #[serde(default)]
    pub independent: bool,
}

/// 按依赖顺序排列的步骤；revision 从 1 开始，每次重新规划 +1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub revision: u32,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// 已分派的调用记录（不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub tool: String,
    pub args: serde_json::Value,
    pub requester: RoleKind,
    pub step_id: StepId,
    /// 同一逻辑调用的第几次尝试（原始调用为 0）
    pub attempt: u32,
    pub retry_of: Option<ToolCallId>,
    pub side_effecting: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failure,
}

/// 工具失败分类：决定修复循环是否介入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    UnknownTool,
    InvalidArguments,
    Execution,
    Timeout,
}

impl ToolFailureKind {
    /// UnknownTool / InvalidArguments 立即终止该 Step，不进入修复循环
    pub fn is_repairable(self) -> bool {
        matches!(self, ToolFailureKind::Execution | ToolFailureKind::Timeout)
    }
}

/// 一次调用的唯一结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: ToolCallId,
    pub status: ToolStatus,
    /// 成功时为输出，失败时为错误描述
    pub output: String,
    pub failure: Option<ToolFailureKind>,
}

impl ToolResult {
    pub fn success(call_id: ToolCallId, output: impl Into<String>) -> Self {
        Self {
            call_id,
            status: ToolStatus::Success,
            output: output.into(),
            failure: None,
        }
    }

    pub fn failure(call_id: ToolCallId, kind: ToolFailureKind, error: impl Into<String>) -> Self {
        Self {
            call_id,
            status: ToolStatus::Failure,
            output: error.into(),
            failure: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// 工具本身是否被执行过；UnknownTool / InvalidArguments 在分派前就被拒绝
    pub fn reached_tool(&self) -> bool {
        !matches!(
            self.failure,
            Some(ToolFailureKind::UnknownTool | ToolFailureKind::InvalidArguments)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_rejects_blank() {
        assert!(Goal::new("   ").is_none());
        assert_eq!(Goal::new("  add fn ").unwrap().as_str(), "add fn");
    }

    #[test]
    fn test_commit_policy_from_str() {
        assert_eq!("auto-commit".parse::<CommitPolicy>().unwrap(), CommitPolicy::AutoCommit);
        assert_eq!("no-commit".parse::<CommitPolicy>().unwrap(), CommitPolicy::NoCommit);
        assert_eq!("ASK".parse::<CommitPolicy>().unwrap(), CommitPolicy::Ask);
        assert!("maybe".parse::<CommitPolicy>().is_err());
    }

    #[test]
    fn test_step_deserializes_with_defaults() {
        let step: Step = serde_json::from_str(r#"{"id":"s1","intent":"do"}"#).unwrap();
        assert_eq!(step.id, StepId("s1".to_string()));
        assert!(step.tool_calls.is_empty());
        assert!(!step.independent);
    }

    #[test]
    fn test_failure_kind_repairable() {
        assert!(ToolFailureKind::Execution.is_repairable());
        assert!(ToolFailureKind::Timeout.is_repairable());
        assert!(!ToolFailureKind::UnknownTool.is_repairable());
        assert!(!ToolFailureKind::InvalidArguments.is_repairable());
    }

    #[test]
    fn test_rejected_calls_never_reach_tool() {
        let id = ToolCallId(1);
        assert!(ToolResult::success(id, "ok").reached_tool());
        assert!(ToolResult::failure(id, ToolFailureKind::Execution, "boom").reached_tool());
        assert!(ToolResult::failure(id, ToolFailureKind::Timeout, "slow").reached_tool());
        assert!(!ToolResult::failure(id, ToolFailureKind::InvalidArguments, "bad").reached_tool());
        assert!(!ToolResult::failure(id, ToolFailureKind::UnknownTool, "nope").reached_tool());
    }
}
