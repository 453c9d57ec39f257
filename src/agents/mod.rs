//! 角色层：Planner / Executor / Verifier
//!
//! 角色之间不直接通信，所有交互经 Orchestrator 中转。

pub mod executor;
pub mod output;
pub mod planner;
pub mod role;
pub mod verifier;

pub use executor::{Executor, ExecutorDecision, RepairContext};
pub use output::{agent_output_schema_json, parse_agent_output, AgentOutput};
pub use planner::Planner;
pub use role::{invoke_role, AgentRole, RoleContext, RoleError};
pub use verifier::{render_transcript, Judgment, Verifier};
