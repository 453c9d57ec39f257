//! Executor：为一个 Step 提出下一次工具调用，或声明该 Step 已完成
//!
//! 修复循环也走这里：附带失败调用与错误描述，要求给出修正后的调用。

use std::sync::Arc;

use crate::agents::output::{validate_call, AgentOutput};
use crate::agents::role::{invoke_role, AgentRole, RoleContext, RoleError};
use crate::core::{ProposedCall, RoleKind, Step, ToolCall};
use crate::core::RecoveryEngine;
use crate::llm::LlmClient;

const INSTRUCTIONS: &str = "You are the Executor of a coding assistant. Given one step of the plan, reply with \
the single next tool_call that advances it, or with final_answer when the step needs no (further) tool calls. \
Only use tools from the catalogue and follow their parameter schemas exactly.";

/// Executor 的决定
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorDecision {
    Call(ProposedCall),
    /// 该 Step 无需（更多）调用
    Done(String),
}

/// 修复请求：被替代的调用及其错误
pub struct RepairContext<'a> {
    pub failed: &'a ToolCall,
    pub error: &'a str,
    pub attempt: u32,
}

pub struct Executor {
    llm: Arc<dyn LlmClient>,
    recovery: RecoveryEngine,
}

struct ProposeRequest {
    repairing: bool,
}

impl AgentRole for ProposeRequest {
    type Output = ExecutorDecision;

    fn kind(&self) -> RoleKind {
        RoleKind::Executor
    }

    fn accept(&self, output: AgentOutput) -> Result<ExecutorDecision, String> {
        match output {
            AgentOutput::ToolCall { tool, args } => validate_call(tool, args).map(ExecutorDecision::Call),
            // 修复时必须给出新的调用
            AgentOutput::FinalAnswer { .. } if self.repairing => {
                Err("a revised tool_call is required to repair the failed call".to_string())
            }
            AgentOutput::FinalAnswer { text } => Ok(ExecutorDecision::Done(text)),
            other => Err(format!("expected tool_call or final_answer, got {}", other.type_name())),
        }
    }
}

impl Executor {
    pub fn new(llm: Arc<dyn LlmClient>, recovery: RecoveryEngine) -> Self {
        Self { llm, recovery }
    }

    pub async fn propose_tool_call(
        &self,
        ctx: &RoleContext<'_>,
        step: &Step,
        progress: &str,
        repair: Option<RepairContext<'_>>,
    ) -> Result<ExecutorDecision, RoleError> {
        let mut request = format!(
            "Step {}: {}\n\n## Calls so far in this step\n{}\n",
            step.id,
            step.intent,
            if progress.is_empty() { "(none)\n" } else { progress }
        );
        if let Some(r) = &repair {
            request.push_str(&format!(
                "\nThe call `{}` with args {} failed (attempt {}):\n{}\n\
                 Reply with a corrected tool_call for this step.\n",
                r.failed.tool, r.failed.args, r.attempt, r.error
            ));
        }
        let messages = ctx.messages(RoleKind::Executor, INSTRUCTIONS, request);
        invoke_role(
            &ProposeRequest {
                repairing: repair.is_some(),
            },
            self.llm.as_ref(),
            messages,
            &self.recovery,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Goal, StepId, ToolCallId};
    use crate::llm::ScriptedLlmClient;
    use crate::memory::WorkingMemory;

    fn step() -> Step {
        Step {
            id: StepId("s1".into()),
            intent: "run tests".into(),
            tool_calls: vec![],
            independent: false,
        }
    }

    #[tokio::test]
    async fn test_propose_and_done() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_json(serde_json::json!({"type": "tool_call", "tool": "run_shell_command", "args": {"command": "pytest"}}));
        llm.push_json(serde_json::json!({"type": "final_answer", "text": "nothing to do"}));
        let exec = Executor::new(llm, RecoveryEngine::default());
        let goal = Goal::new("fix failing test").unwrap();
        let wm = WorkingMemory::new();
        let ctx = RoleContext {
            goal: &goal,
            tool_catalog: "[]",
            working: &wm,
            background: &[],
            max_attempts: 5,
        };
        let first = exec.propose_tool_call(&ctx, &step(), "", None).await.unwrap();
        assert_eq!(
            first,
            ExecutorDecision::Call(ProposedCall::new("run_shell_command", serde_json::json!({"command": "pytest"})))
        );
        let second = exec.propose_tool_call(&ctx, &step(), "", None).await.unwrap();
        assert_eq!(second, ExecutorDecision::Done("nothing to do".into()));
    }

    #[tokio::test]
    async fn test_repair_rejects_final_answer() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_json(serde_json::json!({"type": "final_answer", "text": "give up"}));
        llm.push_json(serde_json::json!({"type": "tool_call", "tool": "run_shell_command", "args": {"command": "pytest -x"}}));
        let exec = Executor::new(llm.clone(), RecoveryEngine::default());
        let goal = Goal::new("fix failing test").unwrap();
        let wm = WorkingMemory::new();
        let ctx = RoleContext {
            goal: &goal,
            tool_catalog: "[]",
            working: &wm,
            background: &[],
            max_attempts: 5,
        };
        let failed = ToolCall {
            id: ToolCallId(1),
            tool: "run_shell_command".into(),
            args: serde_json::json!({"command": "pytest"}),
            requester: RoleKind::Planner,
            step_id: StepId("s1".into()),
            attempt: 0,
            retry_of: None,
            side_effecting: true,
        };
        let decision = exec
            .propose_tool_call(
                &ctx,
                &step(),
                "",
                Some(RepairContext {
                    failed: &failed,
                    error: "Exit 1",
                    attempt: 1,
                }),
            )
            .await
            .unwrap();
        assert!(matches!(decision, ExecutorDecision::Call(c) if c.args["command"] == "pytest -x"));
        assert!(llm.requests()[0].last().unwrap().content.contains("Exit 1"));
    }
}
