//! Mock LLM 客户端（测试与离线演示，无需 API）
//!
//! - ScriptedLlmClient：按 FIFO 顺序返回预置的 completion / 错误，并记录每次请求，供测试断言
//! - MockLlmClient：根据 system prompt 中的角色标记回显一个最小可执行的计划（list_dir .），用于 `--mock`

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{Completion, GatewayError, LlmClient, Message, Role};

/// 预置脚本客户端：脚本耗尽时返回 Transport 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<Completion, GatewayError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: Result<Completion, GatewayError>) {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(item);
        }
    }

    pub fn push_text(&self, content: impl Into<String>) {
        self.push(Ok(Completion::text(content)));
    }

    /// 将 JSON 值序列化为一条 completion
    pub fn push_json(&self, value: serde_json::Value) {
        self.push_text(value.to_string());
    }

    pub fn push_error(&self, err: GatewayError) {
        self.push(Err(err));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 所有请求的快照（按调用顺序）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, GatewayError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Err(GatewayError::Transport("script exhausted".to_string())))
    }
}

/// 离线演示客户端：Planner 得到单步计划，Executor 先给 list_dir 调用、见到成功结果后结束该 Step，Verifier 总是通过
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, GatewayError> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let body = if system.contains("[role:planner]") {
            serde_json::json!({
                "type": "plan",
                "rationale": format!("Mock plan for: {}", first_line(last_user)),
                "steps": [{
                    "id": "s1",
                    "intent": "Inspect the workspace",
                    "tool_calls": [{"tool": "list_dir", "args": {"path": "."}}]
                }]
            })
        } else if system.contains("[role:verifier]") {
            serde_json::json!({"type": "verdict", "pass": true, "rationale": "Mock verifier approves"})
        } else if last_user.contains("\n  ok: ") {
            serde_json::json!({"type": "final_answer", "text": "Mock executor finished the step"})
        } else {
            serde_json::json!({"type": "tool_call", "tool": "list_dir", "args": {"path": "."}})
        };
        Ok(Completion::text(body.to_string()))
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_returns_in_order_then_exhausts() {
        let mock = ScriptedLlmClient::new();
        mock.push_text("first");
        mock.push_error(GatewayError::Timeout);
        let msgs = [Message::user("x")];
        assert_eq!(mock.complete(&msgs).await.unwrap().content, "first");
        assert_eq!(mock.complete(&msgs).await.unwrap_err(), GatewayError::Timeout);
        assert!(matches!(
            mock.complete(&msgs).await.unwrap_err(),
            GatewayError::Transport(_)
        ));
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_answers_by_role_marker() {
        let mock = MockLlmClient;
        let plan = mock
            .complete(&[Message::system("[role:planner]"), Message::user("goal")])
            .await
            .unwrap();
        assert!(plan.content.contains("\"plan\""));
        let verdict = mock
            .complete(&[Message::system("[role:verifier]"), Message::user("check")])
            .await
            .unwrap();
        assert!(verdict.content.contains("\"verdict\""));
    }
}
