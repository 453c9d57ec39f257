//! LLM Gateway 抽象
//!
//! 所有后端（Azure OpenAI / Scripted Mock）实现 LlmClient::complete；失败统一为 GatewayError。
//! RetryingLlmClient 作为装饰器负责有界重试与指数退避，Orchestrator 只看到最终结果。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::Message;

/// 一次 completion 的 token 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// 模型返回的结构化 completion：正文、拒答说明（如有）与用量
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub refusal: Option<String>,
    pub usage: Usage,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn refusal(reason: impl Into<String>) -> Self {
        Self {
            refusal: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Gateway 传输层错误；全部可重试，超出上限后为终止错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway timeout")]
    Timeout,

    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<Completion, GatewayError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 重试策略：max_retries 为首次调用之外的额外次数
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试（从 0 开始）前的等待时间；RateLimited 携带的 retry_after 优先
    pub fn delay_for(&self, attempt: u32, err: &GatewayError) -> Duration {
        if let GatewayError::RateLimited {
            retry_after_ms: Some(ms),
        } = err
        {
            return Duration::from_millis(*ms).min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// 带有界重试的装饰器
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(messages).await {
                Ok(c) => return Ok(c),
                Err(e) if attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt, &e);
                    tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "gateway call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, attempts = attempt + 1, "gateway retries exhausted");
                    return Err(e);
                }
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn no_delay(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_error() {
        let mock = Arc::new(ScriptedLlmClient::new());
        mock.push_error(GatewayError::Timeout);
        mock.push_text("ok");
        let client = RetryingLlmClient::new(mock.clone(), no_delay(2));
        let out = client.complete(&[Message::user("hi")]).await.unwrap();
        assert_eq!(out.content, "ok");
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_bound_is_respected() {
        let mock = Arc::new(ScriptedLlmClient::new());
        for _ in 0..5 {
            mock.push_error(GatewayError::RateLimited { retry_after_ms: None });
        }
        let client = RetryingLlmClient::new(mock.clone(), no_delay(2));
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
        assert_eq!(mock.request_count(), 3);
    }

    #[test]
    fn test_delay_backoff_is_capped() {
        let cfg = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(cfg.delay_for(0, &GatewayError::Timeout), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(1, &GatewayError::Timeout), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(4, &GatewayError::Timeout), Duration::from_millis(300));
        let limited = GatewayError::RateLimited { retry_after_ms: Some(50) };
        assert_eq!(cfg.delay_for(3, &limited), Duration::from_millis(50));
    }
}
