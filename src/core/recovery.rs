//! 错误恢复引擎
//!
//! 把失败映射为 RecoveryAction：瞬时失败在本地有界重试，结构性失败（计划 / 校验反复失败、重试耗尽）
//! 交给 Orchestrator 终止 run。所有上限都来自 [orchestrator] 配置段。

use crate::config::OrchestratorSection;
use crate::core::{RecoveryAction, ToolFailureKind};
use crate::agents::RoleError;

/// 待处理的失败及其已用掉的重试次数
#[derive(Debug, Clone, Copy)]
pub enum Failure<'a> {
    /// 角色输出不合法，已纠错 corrections 次
    MalformedOutput { reason: &'a str, corrections: u32 },
    /// 角色调用最终失败
    Role(&'a RoleError),
    /// 工具调用失败，该逻辑调用已重试 retries 次
    Tool { kind: ToolFailureKind, retries: u32 },
    /// Step 失败，本次 run 已重新规划 replans 次
    StepFailed { replans: u32 },
    /// Verifier 拒绝
    VerificationRejected { replans: u32 },
}

/// 有界重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryEngine {
    pub max_tool_retries: u32,
    pub max_replans: u32,
    pub corrective_retries: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self {
            max_tool_retries: 3,
            max_replans: 2,
            corrective_retries: 1,
        }
    }
}

impl RecoveryEngine {
    pub fn new(max_tool_retries: u32, max_replans: u32, corrective_retries: u32) -> Self {
        Self {
            max_tool_retries,
            max_replans,
            corrective_retries,
        }
    }

    pub fn from_config(cfg: &OrchestratorSection) -> Self {
        Self::new(cfg.max_tool_retries, cfg.max_replans, cfg.corrective_retries)
    }

    pub fn handle(&self, failure: Failure<'_>) -> RecoveryAction {
        match failure {
            Failure::MalformedOutput { reason, corrections } => {
                if corrections < self.corrective_retries {
                    RecoveryAction::CorrectiveRetry(format!(
                        "Your previous reply was rejected: {reason}. \
                         Reply again with ONLY one JSON object that matches the schema in the system prompt, \
                         with no markdown or commentary."
                    ))
                } else {
                    RecoveryAction::Replan
                }
            }
            // Gateway 已在 RetryingLlmClient 中重试过，到这里即为终止
            Failure::Role(RoleError::Gateway { .. } | RoleError::ModelTimeout { .. }) => RecoveryAction::Abort,
            Failure::Role(RoleError::MalformedOutput { .. } | RoleError::ModelRefusal { .. }) => {
                RecoveryAction::Replan
            }
            Failure::Tool { kind, retries } => {
                if !kind.is_repairable() || retries >= self.max_tool_retries {
                    RecoveryAction::Replan
                } else if kind == ToolFailureKind::Timeout {
                    RecoveryAction::Retry
                } else {
                    RecoveryAction::Repair
                }
            }
            Failure::StepFailed { replans } | Failure::VerificationRejected { replans } => {
                if replans < self.max_replans {
                    RecoveryAction::Replan
                } else {
                    RecoveryAction::Abort
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RoleKind;
    use crate::llm::GatewayError;

    #[test]
    fn test_malformed_gets_one_corrective_retry() {
        let engine = RecoveryEngine::default();
        let first = engine.handle(Failure::MalformedOutput { reason: "not json", corrections: 0 });
        match first {
            RecoveryAction::CorrectiveRetry(prompt) => assert!(prompt.contains("not json")),
            other => panic!("expected CorrectiveRetry, got {other:?}"),
        }
        assert_eq!(
            engine.handle(Failure::MalformedOutput { reason: "x", corrections: 1 }),
            RecoveryAction::Replan
        );
    }

    #[test]
    fn test_tool_failures() {
        let engine = RecoveryEngine::default();
        assert_eq!(
            engine.handle(Failure::Tool { kind: ToolFailureKind::UnknownTool, retries: 0 }),
            RecoveryAction::Replan
        );
        assert_eq!(
            engine.handle(Failure::Tool { kind: ToolFailureKind::InvalidArguments, retries: 0 }),
            RecoveryAction::Replan
        );
        assert_eq!(
            engine.handle(Failure::Tool { kind: ToolFailureKind::Execution, retries: 2 }),
            RecoveryAction::Repair
        );
        assert_eq!(
            engine.handle(Failure::Tool { kind: ToolFailureKind::Timeout, retries: 0 }),
            RecoveryAction::Retry
        );
        assert_eq!(
            engine.handle(Failure::Tool { kind: ToolFailureKind::Execution, retries: 3 }),
            RecoveryAction::Replan
        );
    }

    #[test]
    fn test_replan_bound() {
        let engine = RecoveryEngine::default();
        assert_eq!(engine.handle(Failure::StepFailed { replans: 1 }), RecoveryAction::Replan);
        assert_eq!(engine.handle(Failure::StepFailed { replans: 2 }), RecoveryAction::Abort);
        assert_eq!(engine.handle(Failure::VerificationRejected { replans: 0 }), RecoveryAction::Replan);
    }

    #[test]
    fn test_gateway_role_errors_abort() {
        let engine = RecoveryEngine::default();
        let err = RoleError::Gateway {
            role: RoleKind::Planner,
            source: GatewayError::RateLimited { retry_after_ms: None },
        };
        assert_eq!(engine.handle(Failure::Role(&err)), RecoveryAction::Abort);
        let refusal = RoleError::ModelRefusal {
            role: RoleKind::Executor,
            reason: "no".into(),
        };
        assert_eq!(engine.handle(Failure::Role(&refusal)), RecoveryAction::Replan);
    }
}
