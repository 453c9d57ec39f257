//! LLM Gateway：客户端抽象、有界重试装饰器与实现（Azure OpenAI / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{AzureOpenAiClient, AzureSettings, TokenUsage, DEFAULT_API_VERSION};
pub use traits::{
    Completion, GatewayError, LlmClient, RetryConfig, RetryingLlmClient, Usage,
};
