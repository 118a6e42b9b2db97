//! 脚本化 LLM 客户端（用于测试，无需 API）
//!
//! 按顺序回放预先排好的响应或错误；脚本耗尽后返回 repeat 响应（若设置），否则报错。
//! 每次收到的对话都会被记录，便于断言上下文拼接结果。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, LlmResponse};
use crate::memory::Message;
use crate::tools::ToolDefinition;

#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    repeat: Option<LlmResponse>,
    conversations: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// 全部成功的响应序列
    pub fn from_responses(responses: Vec<LlmResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    /// 每次都返回同一响应
    pub fn repeating(response: LlmResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Default::default()
        }
    }

    pub fn then_repeat(mut self, response: LlmResponse) -> Self {
        self.repeat = Some(response);
        self
    }

    /// 已收到的对话（按调用顺序）
    pub fn conversations(&self) -> Vec<Vec<Message>> {
        self.conversations.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.conversations.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(&self, messages: &[Message], _tools: &[ToolDefinition]) -> Result<LlmResponse, LlmError> {
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        let next = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match next {
            Some(result) => result,
            None => self
                .repeat
                .clone()
                .ok_or_else(|| LlmError::InvalidResponse("脚本响应已耗尽".to_string())),
        }
    }

    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
