//! Verifier：检查执行结果是否满足目标
//!
//! 只读取 Plan 与调用记录，不发起工具调用。模型返回纯文本 "OK" / "PASS" 时视为通过，
//! 否则要求结构化 verdict。

use std::sync::Arc;

use crate::agents::output::AgentOutput;
use crate::agents::role::{invoke_role, AgentRole, RoleContext, RoleError};
use crate::core::{Plan, RoleKind, ToolCall, ToolResult};
use crate::core::RecoveryEngine;
use crate::llm::LlmClient;

const INSTRUCTIONS: &str = "You are the Verifier of a coding assistant. Judge whether the executed plan and \
its tool results achieve the goal. Reply with a verdict object: pass=true only when the goal is met; \
otherwise pass=false and a rationale the Planner can use to revise the plan.";

/// 单条调用记录截断长度
const MAX_RESULT_CHARS: usize = 2000;

/// 校验结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    pub pass: bool,
    pub rationale: String,
}

pub struct Verifier {
    llm: Arc<dyn LlmClient>,
    recovery: RecoveryEngine,
}

struct VerifyRequest;

impl AgentRole for VerifyRequest {
    type Output = Judgment;

    fn kind(&self) -> RoleKind {
        RoleKind::Verifier
    }

    fn accept(&self, output: AgentOutput) -> Result<Judgment, String> {
        match output {
            AgentOutput::Verdict { pass, rationale } => Ok(Judgment {
                pass,
                rationale,
            }),
            other => Err(format!("expected verdict, got {}", other.type_name())),
        }
    }

    fn accept_plain(&self, text: &str) -> Option<Judgment> {
        let upper = text.trim().to_uppercase();
        (upper.starts_with("OK") || upper.starts_with("PASS")).then(|| Judgment {
            pass: true,
            rationale: text.trim().to_string(),
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...[truncated]")
    }
}

/// 按分派顺序渲染调用记录
pub fn render_transcript(calls: &[(ToolCall, Option<ToolResult>)]) -> String {
    let mut out = String::new();
    for (call, result) in calls {
        out.push_str(&format!("- [{}] {} {} args={}\n", call.step_id, call.id, call.tool, call.args));
        match result {
            Some(r) if r.is_success() => {
                out.push_str(&format!("  ok: {}\n", truncate(&r.output, MAX_RESULT_CHARS)))
            }
            Some(r) => out.push_str(&format!("  failed: {}\n", truncate(&r.output, MAX_RESULT_CHARS))),
            None => out.push_str("  (no result)\n"),
        }
    }
    out
}

impl Verifier {
    pub fn new(llm: Arc<dyn LlmClient>, recovery: RecoveryEngine) -> Self {
        Self { llm, recovery }
    }

    pub async fn verify_result(
        &self,
        ctx: &RoleContext<'_>,
        plan: &Plan,
        transcript: &str,
    ) -> Result<Judgment, RoleError> {
        let mut request = format!("Goal:\n{}\n\nPlan (revision {}):\n", ctx.goal, plan.revision);
        for step in &plan.steps {
            request.push_str(&format!("- {}: {}\n", step.id, step.intent));
        }
        request.push_str("\nTool calls and results:\n");
        request.push_str(if transcript.is_empty() { "(none)\n" } else { transcript });
        let messages = ctx.messages(RoleKind::Verifier, INSTRUCTIONS, request);
        let judgment = invoke_role(&VerifyRequest, self.llm.as_ref(), messages, &self.recovery).await?;
        tracing::info!(pass = judgment.pass, "verification recorded");
        Ok(judgment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Goal, Step, StepId, ToolCallId};
    use crate::llm::ScriptedLlmClient;
    use crate::memory::WorkingMemory;

    fn plan() -> Plan {
        Plan {
            revision: 1,
            steps: vec![Step {
                id: StepId("s1".into()),
                intent: "list files".into(),
                tool_calls: vec![],
                independent: false,
            }],
            rationale: None,
        }
    }

    async fn verify(llm: Arc<ScriptedLlmClient>) -> Result<Judgment, RoleError> {
        let goal = Goal::new("list files").unwrap();
        let wm = WorkingMemory::new();
        let ctx = RoleContext {
            goal: &goal,
            tool_catalog: "[]",
            working: &wm,
            background: &[],
            max_attempts: 5,
        };
        Verifier::new(llm, RecoveryEngine::default()).verify_result(&ctx, &plan(), "").await
    }

    #[tokio::test]
    async fn test_plain_ok_is_pass() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("OK");
        assert!(verify(llm).await.unwrap().pass);
    }

    #[tokio::test]
    async fn test_structured_fail() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_json(serde_json::json!({"type": "verdict", "pass": false, "rationale": "tests still fail"}));
        let j = verify(llm.clone()).await.unwrap();
        assert!(!j.pass);
        assert_eq!(j.rationale, "tests still fail");
        assert!(llm.requests()[0][0].content.starts_with("[role:verifier]"));
    }

    #[test]
    fn test_accept_verdict_without_rationale() {
        let out = crate::agents::parse_agent_output(r#"{"type":"verdict","pass":true}"#).unwrap();
        let j = VerifyRequest.accept(out).unwrap();
        assert!(j.pass);
        assert_eq!(j.rationale, "");

        let answer = crate::agents::parse_agent_output(r#"{"type":"final_answer","text":"done"}"#).unwrap();
        assert_eq!(
            VerifyRequest.accept(answer).unwrap_err(),
            "expected verdict, got final_answer"
        );
    }

    #[test]
    fn test_render_transcript_truncates() {
        let call = ToolCall {
            id: ToolCallId(3),
            tool: "read_file".into(),
            args: serde_json::json!({"path": "a"}),
            requester: RoleKind::Executor,
            step_id: StepId("s1".into()),
            attempt: 0,
            retry_of: None,
            side_effecting: false,
        };
        let long = "x".repeat(MAX_RESULT_CHARS + 10);
        let text = render_transcript(&[(call, Some(ToolResult::success(ToolCallId(3), long)))]);
        assert!(text.contains("call-3 read_file"));
        assert!(text.contains("[truncated]"));
    }
}
