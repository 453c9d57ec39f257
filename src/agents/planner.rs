//! Planner：由目标（及上一轮失败上下文）产出按依赖顺序排列的 Plan

use std::sync::Arc;

use crate::agents::output::{validate_plan, AgentOutput};
use crate::agents::role::{invoke_role, AgentRole, RoleContext, RoleError};
use crate::core::{Plan, RoleKind};
use crate::core::RecoveryEngine;
use crate::llm::LlmClient;

const INSTRUCTIONS: &str = "You are the Planner of a coding assistant. Break the goal into an ordered list of \
steps (dependency order; later steps may rely on earlier ones). Each step has an id, a one-line intent \
and, when you already know them, the tool calls that implement it. Mark a step \"independent\" only if \
it neither depends on nor affects its neighbours. Respond with a plan object.";

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    recovery: RecoveryEngine,
}

/// accept 时需要知道本次 Plan 的版本号
struct PlanRequest {
    revision: u32,
}

impl AgentRole for PlanRequest {
    type Output = Plan;

    fn kind(&self) -> RoleKind {
        RoleKind::Planner
    }

    fn accept(&self, output: AgentOutput) -> Result<Plan, String> {
        match output {
            AgentOutput::Plan { steps, rationale } => validate_plan(steps, rationale, self.revision),
            other => Err(format!("expected a plan, got {}", other.type_name())),
        }
    }
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, recovery: RecoveryEngine) -> Self {
        Self { llm, recovery }
    }

    /// 产出第 revision 版计划；failure 为上一版计划失败（步骤失败或校验未通过）的说明
    pub async fn produce_plan(
        &self,
        ctx: &RoleContext<'_>,
        revision: u32,
        failure: Option<&str>,
    ) -> Result<Plan, RoleError> {
        let mut request = format!("Goal:\n{}\n", ctx.goal);
        if let Some(f) = failure {
            request.push_str(&format!(
                "\nThe previous plan (revision {}) failed:\n{}\nProduce a new complete plan that replaces it.\n",
                revision.saturating_sub(1),
                f
            ));
        }
        let messages = ctx.messages(RoleKind::Planner, INSTRUCTIONS, request);
        let plan = invoke_role(
            &PlanRequest { revision },
            self.llm.as_ref(),
            messages,
            &self.recovery,
        )
        .await?;
        tracing::info!(revision, steps = plan.steps.len(), "plan produced");
        Ok(plan)
    }
}
