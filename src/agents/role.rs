//! 角色抽象：一次 LLM 调用 -> 结构化输出或类型化失败
//!
//! 每个角色的唯一操作是 (上下文, Gateway) 的纯函数。invoke_role 负责公共流程：
//! 调用 Gateway、识别拒答、解析与校验输出；MalformedOutput 先带纠错提示重试（默认一次），仍失败才上报。

use thiserror::Error;

use crate::agents::output::{agent_output_schema_json, parse_agent_output, AgentOutput};
use crate::core::{Failure, Goal, RecoveryAction, RecoveryEngine, RoleKind};
use crate::llm::{GatewayError, LlmClient, Message};
use crate::memory::WorkingMemory;

/// 角色调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("{role}: model timed out")]
    ModelTimeout { role: RoleKind },

    #[error("{role}: model refused: {reason}")]
    ModelRefusal { role: RoleKind, reason: String },

    #[error("{role}: malformed output: {reason}")]
    MalformedOutput { role: RoleKind, reason: String },

    #[error("{role}: {source}")]
    Gateway {
        role: RoleKind,
        #[source]
        source: GatewayError,
    },
}

impl RoleError {
    pub fn role(&self) -> RoleKind {
        match self {
            RoleError::ModelTimeout { role }
            | RoleError::ModelRefusal { role, .. }
            | RoleError::MalformedOutput { role, .. }
            | RoleError::Gateway { role, .. } => *role,
        }
    }
}

/// 角色共享的只读上下文
#[derive(Clone, Copy)]
pub struct RoleContext<'a> {
    pub goal: &'a Goal,
    /// 工具目录 JSON（ToolRegistry::to_schema_json）
    pub tool_catalog: &'a str,
    pub working: &'a WorkingMemory,
    /// REPL 中之前几次 run 的对话背景
    pub background: &'a [Message],
    pub max_attempts: usize,
}

impl RoleContext<'_> {
    /// system prompt：角色标记 + 角色说明 + 输出格式 + 工具目录 + 工作记忆
    pub fn system_message(&self, kind: RoleKind, instructions: &str) -> Message {
        Message::system(format!(
            "[role:{kind}]\n{instructions}\n\n\
             Reply with exactly one JSON object matching this schema:\n{}\n\n\
             ## Available tools\n{}\n\n{}",
            agent_output_schema_json(),
            self.tool_catalog,
            self.working.to_prompt_section(self.max_attempts),
        ))
    }

    /// system + 背景对话 + 当前请求
    pub fn messages(&self, kind: RoleKind, instructions: &str, request: String) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.background.len() + 2);
        messages.push(self.system_message(kind, instructions));
        messages.extend(self.background.iter().cloned());
        messages.push(Message::user(request));
        messages
    }
}

/// 角色：声明自己的种类，并把通用 AgentOutput 收窄为本角色的输出类型
pub trait AgentRole: Send + Sync {
    type Output: Send;

    fn kind(&self) -> RoleKind;

    /// 不符合本角色期望的变体返回 Err（作为纠错说明）
    fn accept(&self, output: AgentOutput) -> Result<Self::Output, String>;

    /// 纯文本回退解析（无 JSON 时）；默认不接受
    fn accept_plain(&self, _text: &str) -> Option<Self::Output> {
        None
    }
}

/// 调用角色：Gateway 错误 -> RoleError::Gateway（Timeout -> ModelTimeout），拒答 -> ModelRefusal，
/// 输出不合法时由 RecoveryEngine 决定是否追加纠错提示重试
pub async fn invoke_role<R: AgentRole + ?Sized>(
    role: &R,
    llm: &dyn LlmClient,
    mut messages: Vec<Message>,
    recovery: &RecoveryEngine,
) -> Result<R::Output, RoleError> {
    let kind = role.kind();
    let mut corrections = 0;
    loop {
        let completion = llm.complete(&messages).await.map_err(|e| match e {
            GatewayError::Timeout => RoleError::ModelTimeout { role: kind },
            other => RoleError::Gateway {
                role: kind,
                source: other,
            },
        })?;

        if let Some(reason) = completion.refusal.as_ref().filter(|_| completion.content.trim().is_empty()) {
            tracing::warn!(role = %kind, reason = %reason, "model refused");
            return Err(RoleError::ModelRefusal {
                role: kind,
                reason: reason.clone(),
            });
        }

        let parsed = match parse_agent_output(&completion.content) {
            Ok(output) => {
                let type_name = output.type_name();
                role.accept(output)
                    .map_err(|e| format!("{type_name} output rejected: {e}"))
            }
            Err(e) => role.accept_plain(&completion.content).ok_or(e),
        };

        let reason = match parsed {
            Ok(out) => return Ok(out),
            Err(reason) => reason,
        };
        match recovery.handle(Failure::MalformedOutput {
            reason: &reason,
            corrections,
        }) {
            RecoveryAction::CorrectiveRetry(prompt) => {
                tracing::warn!(role = %kind, reason = %reason, "malformed output, retrying with corrective prompt");
                corrections += 1;
                messages.push(Message::assistant(completion.content));
                messages.push(Message::user(prompt));
            }
            _ => {
                tracing::warn!(role = %kind, reason = %reason, "malformed output, giving up");
                return Err(RoleError::MalformedOutput { role: kind, reason });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, ScriptedLlmClient};

    struct AnswerOnly;

    impl AgentRole for AnswerOnly {
        type Output = String;

        fn kind(&self) -> RoleKind {
            RoleKind::Executor
        }

        fn accept(&self, output: AgentOutput) -> Result<String, String> {
            match output {
                AgentOutput::FinalAnswer { text } => Ok(text),
                other => Err(format!("expected final_answer, got {}", other.type_name())),
            }
        }
    }

    fn msgs() -> Vec<Message> {
        vec![Message::user("go")]
    }

    #[tokio::test]
    async fn test_corrective_retry_once_then_ok() {
        let llm = ScriptedLlmClient::new();
        llm.push_text("not json");
        llm.push_json(serde_json::json!({"type": "final_answer", "text": "42"}));
        let out = invoke_role(&AnswerOnly, &llm, msgs(), &RecoveryEngine::default()).await.unwrap();
        assert_eq!(out, "42");
        let second = &llm.requests()[1];
        assert!(second.last().unwrap().content.contains("rejected"));
    }

    #[tokio::test]
    async fn test_malformed_twice_escalates() {
        let llm = ScriptedLlmClient::new();
        llm.push_json(serde_json::json!({"type": "verdict", "pass": true}));
        llm.push_text("still not json");
        let err = invoke_role(&AnswerOnly, &llm, msgs(), &RecoveryEngine::default()).await.unwrap_err();
        assert!(matches!(err, RoleError::MalformedOutput { role: RoleKind::Executor, .. }));
        assert_eq!(llm.request_count(), 2);
    }

    #[tokio::test]
    async fn test_refusal_and_gateway_mapping() {
        let llm = ScriptedLlmClient::new();
        llm.push(Ok(Completion::refusal("cannot help")));
        llm.push_error(GatewayError::Timeout);
        llm.push_error(GatewayError::Auth("bad key".into()));
        assert!(matches!(
            invoke_role(&AnswerOnly, &llm, msgs(), &RecoveryEngine::default()).await.unwrap_err(),
            RoleError::ModelRefusal { .. }
        ));
        assert!(matches!(
            invoke_role(&AnswerOnly, &llm, msgs(), &RecoveryEngine::default()).await.unwrap_err(),
            RoleError::ModelTimeout { .. }
        ));
        assert!(matches!(
            invoke_role(&AnswerOnly, &llm, msgs(), &RecoveryEngine::default()).await.unwrap_err(),
            RoleError::Gateway { source: GatewayError::Auth(_), .. }
        ));
    }
}
