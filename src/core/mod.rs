//! 核心编排层：数据模型、错误与恢复、执行状态、Checkpoint、会话监管、主控循环

pub mod builder;
pub mod checkpoint;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod types;

pub use builder::{create_llm_from_config, resolve_workspace, OrchestratorBuilder};
pub use checkpoint::{Checkpoint, RollbackReport, WorkspaceSnapshot};
pub use error::{RecoveryAction, RollbackError, RunError};
pub use orchestrator::{CommitApprover, FixedApprover, Orchestrator};
pub use outcome::{exit_code, CommitDisposition, RunOutcome, RunStatus, SideEffect};
pub use recovery::{Failure, RecoveryEngine};
pub use session_supervisor::SessionSupervisor;
pub use state::{ExecutionState, RunVerdict};
pub use types::{
    CommitPolicy, Goal, Plan, ProposedCall, RoleKind, RunMode, Step, StepId, ToolCall, ToolCallId,
    ToolFailureKind, ToolResult, ToolStatus,
};
