//! 对话消息
//!
//! Message 按角色区分变体：user 文本与工具结果是两个独立变体，不会同时出现；
//! Memory 是每步临时拼接的记忆摘录，以 system 角色发送，从不持久化。

use serde::{Deserialize, Serialize};

use crate::tools::{ToolCall, ToolResult};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    /// 临时记忆消息
    Memory { content: String },
    User { content: String },
    ToolResult { result: ToolResult },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System { content: content.into() }
    }

    pub fn memory(content: impl Into<String>) -> Self {
        Message::Memory { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User { content: content.into() }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Message::ToolResult { result }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// 带工具调用的 assistant 消息；空文本记为 None
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let content = content.into();
        Message::Assistant {
            content: (!content.is_empty()).then_some(content),
            tool_calls,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System { .. } | Message::Memory { .. } => Role::System,
            Message::User { .. } | Message::ToolResult { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
        }
    }

    /// 消息的可读文本：工具结果取结果或错误文本，assistant 无文本时为空串
    pub fn text(&self) -> &str {
        match self {
            Message::System { content } | Message::Memory { content } | Message::User { content } => content,
            Message::ToolResult { result } => result.text(),
            Message::Assistant { content, .. } => content.as_deref().unwrap_or(""),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Message::Memory { .. })
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}
