//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时；有副作用的调用需先拿到工作区写锁，保证同一时刻只有一个调用改动工作区。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::tools::{ToolError, ToolRegistry};

/// 工具执行器：超时、写锁与审计
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    worktree_lock: Mutex<()>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: Duration::from_secs(timeout_secs),
            worktree_lock: Mutex::new(()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；超时返回 ToolError::Timeout
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, ToolError> {
        let side_effecting = self.registry.is_side_effecting(tool_name).unwrap_or(false);
        let _guard = if side_effecting {
            Some(self.worktree_lock.lock().await)
        } else {
            None
        };

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = match timeout(self.timeout, self.registry.invoke(tool_name, args)).await {
            Ok(r) => r,
            Err(_) => Err(ToolError::Timeout(tool_name.to_string())),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Timeout(_)) => "timeout",
            Err(ToolError::UnknownTool(_)) => "unknown_tool",
            Err(ToolError::InvalidArguments { .. }) => "invalid_arguments",
            Err(ToolError::ToolExecutionError { .. }) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "side_effecting": side_effecting,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        result
    }

    pub fn is_side_effecting(&self, name: &str) -> Option<bool> {
        self.registry.is_side_effecting(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

/// 审计日志与提交确认中使用的参数摘要（最多 200 字符）
pub fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("done".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_error() {
        let mut reg = ToolRegistry::new();
        reg.register(Sleepy);
        let exec = ToolExecutor::new(reg, 1).with_timeout(Duration::from_millis(20));
        let err = exec.execute("sleepy", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::Timeout("sleepy".to_string()));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = serde_json::json!({"content": "x".repeat(500)});
        assert!(args_preview(&long).ends_with("..."));
    }
}
