//! Azure OpenAI 客户端
//!
//! 通过 async_openai 调用 Azure 部署（endpoint + api key + deployment id）；
//! 请求超时、HTTP 状态与 API 错误统一映射为 GatewayError，调用方不会看到原始传输异常。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::AzureConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{Completion, GatewayError, LlmClient, Message, Role, Usage};

/// 与原始部署一致的 API 版本
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// Gateway 连接参数（endpoint / key / deployment 三项来自环境变量，其余来自配置）
#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub request_timeout: Duration,
}

/// Azure OpenAI 客户端：持有 Client 与部署名，complete 时转换消息并取首条 choice
pub struct AzureOpenAiClient {
    client: Client<AzureConfig>,
    deployment: String,
    request_timeout: Duration,
    pub usage: TokenUsage,
}

impl AzureOpenAiClient {
    pub fn new(settings: AzureSettings) -> Self {
        let config = AzureConfig::new()
            .with_api_base(settings.endpoint)
            .with_api_key(settings.api_key)
            .with_deployment_id(settings.deployment.clone())
            .with_api_version(settings.api_version);
        Self {
            client: Client::with_config(config),
            deployment: settings.deployment,
            request_timeout: settings.request_timeout,
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, GatewayError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                built.map_err(|e| GatewayError::Transport(e.to_string()))
            })
            .collect()
    }
}

/// 将 async_openai 错误映射为 GatewayError
fn classify_error(err: OpenAIError) -> GatewayError {
    match err {
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() {
                return GatewayError::Timeout;
            }
            match e.status().map(|s| s.as_u16()) {
                Some(429) => GatewayError::RateLimited { retry_after_ms: None },
                Some(401) | Some(403) => GatewayError::Auth(e.to_string()),
                _ => GatewayError::Transport(e.to_string()),
            }
        }
        other => classify_message(&other.to_string()),
    }
}

/// API 错误只带消息文本，按关键字归类
fn classify_message(msg: &str) -> GatewayError {
    let lower = msg.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("ratelimit") {
        GatewayError::RateLimited { retry_after_ms: None }
    } else if lower.contains("401")
        || lower.contains("access denied")
        || lower.contains("invalid api key")
        || lower.contains("unauthorized")
    {
        GatewayError::Auth(msg.to_string())
    } else if lower.contains("timed out") || lower.contains("timeout") {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(msg.to_string())
    }
}

#[async_trait]
impl LlmClient for AzureOpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<Completion, GatewayError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.deployment)
            .messages(Self::to_openai_messages(messages)?)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(classify_error)?;

        let mut usage = Usage::default();
        if let Some(u) = &response.usage {
            usage.prompt_tokens = u.prompt_tokens as u64;
            usage.completion_tokens = u.completion_tokens as u64;
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let (content, refusal) = response
            .choices
            .first()
            .map(|c| (c.message.content.clone().unwrap_or_default(), c.message.refusal.clone()))
            .unwrap_or_default();

        Ok(Completion {
            content,
            refusal,
            usage,
        })
    }
}
