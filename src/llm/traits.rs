//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 HTTP / 脚本化 Mock）实现 LlmClient::chat：发送对话与工具目录，
//! 返回文本和/或有序的工具调用。传输或鉴权失败以 LlmError 返回，由循环终止本次执行。

use std::ops::{Add, AddAssign};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::Message;
use crate::tools::{ToolCall, ToolDefinition};

/// 单次调用的 token 用量
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub reasoning_tokens: u64,
}

impl LlmUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for LlmUsage {
    type Output = LlmUsage;

    fn add(self, other: LlmUsage) -> LlmUsage {
        LlmUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cache_creation_input_tokens: self.cache_creation_input_tokens + other.cache_creation_input_tokens,
            cache_read_input_tokens: self.cache_read_input_tokens + other.cache_read_input_tokens,
            reasoning_tokens: self.reasoning_tokens + other.reasoning_tokens,
        }
    }
}

impl AddAssign for LlmUsage {
    fn add_assign(&mut self, other: LlmUsage) {
        *self = self.clone() + other;
    }
}

/// LLM 响应；tool_calls 为 Some 表示模型请求了工具（列表可能为空）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<LlmUsage>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl LlmResponse {
    /// 纯文本响应
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        }
    }

    /// 带工具调用的响应
    pub fn with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("tool_calls".to_string()),
            tool_calls: Some(calls),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: LlmUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("网络错误: {0}")]
    Transport(String),

    #[error("鉴权失败: {0}")]
    Auth(String),

    #[error("API 错误 ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("请求过于频繁: {0}")]
    RateLimited(String),

    #[error("无法解析响应: {0}")]
    InvalidResponse(String),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 发送对话与可用工具定义，返回一次完成
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmResponse, LlmError>;

    /// 提供方名称，如 "openai"
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_add() {
        let a = LlmUsage {
            input_tokens: 3,
            output_tokens: 4,
            reasoning_tokens: 1,
            ..Default::default()
        };
        let mut b = a.clone();
        b += a;
        assert_eq!(b.input_tokens, 6);
        assert_eq!(b.reasoning_tokens, 2);
        assert_eq!(b.total(), 14);
    }
}
