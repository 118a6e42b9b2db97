//! 提供方工厂
//!
//! 所有提供方都走 OpenAI 兼容接口，只在 base_url、默认模型与 API Key 环境变量上不同。
//! - openai:   https://api.openai.com/v1（可用 OPENAI_BASE_URL 覆盖），OPENAI_API_KEY
//! - doubao:   方舟 https://ark.cn-beijing.volces.com/api/v3（ARK_BASE_URL），ARK_API_KEY
//! - qwen:     DashScope 兼容模式（QWEN_BASE_URL），QWEN_API_KEY / DASHSCOPE_API_KEY
//! - deepseek: https://api.deepseek.com，DEEPSEEK_API_KEY

use std::fmt;
use std::sync::Arc;

use crate::llm::openai::{OpenAiClient, OPENAI_BASE_URL};
use crate::llm::LlmClient;

pub const DOUBAO_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DOUBAO_DEFAULT_MODEL: &str = "doubao-seed-1-6-251015";
pub const QWEN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const QWEN_DEFAULT_MODEL: &str = "qwen-plus";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Doubao,
    Qwen,
    DeepSeek,
}

impl Provider {
    /// 解析提供方名称；未知名称回退为 OpenAI
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "openai" => Provider::OpenAi,
            "doubao" | "ark" => Provider::Doubao,
            "qwen" | "dashscope" => Provider::Qwen,
            "deepseek" => Provider::DeepSeek,
            other => {
                tracing::warn!(provider = %other, "unknown llm provider, falling back to openai");
                Provider::OpenAi
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Doubao => "doubao",
            Provider::Qwen => "qwen",
            Provider::DeepSeek => "deepseek",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => OPENAI_DEFAULT_MODEL,
            Provider::Doubao => DOUBAO_DEFAULT_MODEL,
            Provider::Qwen => QWEN_DEFAULT_MODEL,
            Provider::DeepSeek => DEEPSEEK_CHAT,
        }
    }

    /// 默认 base_url，优先读取对应环境变量
    pub fn default_base_url(&self) -> String {
        let (env, fallback) = match self {
            Provider::OpenAi => ("OPENAI_BASE_URL", OPENAI_BASE_URL),
            Provider::Doubao => ("ARK_BASE_URL", DOUBAO_BASE_URL),
            Provider::Qwen => ("QWEN_BASE_URL", QWEN_BASE_URL),
            Provider::DeepSeek => ("DEEPSEEK_BASE_URL", DEEPSEEK_BASE_URL),
        };
        std::env::var(env)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }

    /// 按顺序查找的 API Key 环境变量
    pub fn api_key_envs(&self) -> &'static [&'static str] {
        match self {
            Provider::OpenAi => &["OPENAI_API_KEY"],
            Provider::Doubao => &["ARK_API_KEY"],
            Provider::Qwen => &["QWEN_API_KEY", "DASHSCOPE_API_KEY"],
            Provider::DeepSeek => &["DEEPSEEK_API_KEY"],
        }
    }

    /// 显式传入的 key 优先，其次环境变量
    pub fn resolve_api_key(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .filter(|k| !k.is_empty())
            .map(String::from)
            .or_else(|| {
                self.api_key_envs()
                    .iter()
                    .find_map(|env| std::env::var(env).ok().filter(|v| !v.is_empty()))
            })
    }

    /// "gpt-4" 与 "default" 视为未指定模型，换成提供方默认模型
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim) {
            None | Some("") | Some("default") => self.default_model().to_string(),
            Some("gpt-4") if *self != Provider::OpenAi => self.default_model().to_string(),
            Some(m) => m.to_string(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 创建 LLM 客户端参数
#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub strict_tools: bool,
}

/// 创建 LLM 客户端
pub fn create_llm_client(options: &ClientOptions) -> Arc<dyn LlmClient> {
    let base_url = options
        .base_url
        .clone()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| options.provider.default_base_url());
    tracing::info!(provider = %options.provider, model = %options.model, base_url = %base_url, "llm client created");
    Arc::new(
        OpenAiClient::new(
            options.provider.as_str(),
            Some(&base_url),
            &options.model,
            &options.api_key,
            options.timeout_secs,
        )
        .with_strict_tools(options.strict_tools),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_fallback() {
        assert_eq!(Provider::parse("Doubao"), Provider::Doubao);
        assert_eq!(Provider::parse("qwen"), Provider::Qwen);
        assert_eq!(Provider::parse("something-else"), Provider::OpenAi);
    }

    #[test]
    fn test_default_model_substitution() {
        assert_eq!(Provider::Doubao.resolve_model(Some("gpt-4")), DOUBAO_DEFAULT_MODEL);
        assert_eq!(Provider::Qwen.resolve_model(Some("default")), QWEN_DEFAULT_MODEL);
        assert_eq!(Provider::OpenAi.resolve_model(Some("gpt-4")), "gpt-4");
        assert_eq!(Provider::Qwen.resolve_model(Some("qwen-max")), "qwen-max");
        assert_eq!(Provider::DeepSeek.resolve_model(None), DEEPSEEK_CHAT);
    }

    #[test]
    fn test_explicit_key_wins() {
        assert_eq!(Provider::OpenAi.resolve_api_key(Some("sk-x")).as_deref(), Some("sk-x"));
    }

    #[test]
    fn test_factory_uses_provider_name() {
        let client = create_llm_client(&ClientOptions {
            provider: Provider::Doubao,
            model: DOUBAO_DEFAULT_MODEL.to_string(),
            api_key: "k".to_string(),
            base_url: Some("http://localhost:9/v3".to_string()),
            timeout_secs: 5,
            strict_tools: false,
        });
        assert_eq!(client.provider(), "doubao");
        assert_eq!(client.model(), DOUBAO_DEFAULT_MODEL);
    }
}
