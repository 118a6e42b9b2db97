//! LLM 层：客户端抽象与实现（OpenAI 兼容 HTTP / 提供方工厂 / 脚本化 Mock）

pub mod mock;
pub mod openai;
pub mod providers;
pub mod traits;

pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use providers::{create_llm_client, ClientOptions, Provider};
pub use traits::{LlmClient, LlmError, LlmResponse, LlmUsage};
