//! OpenAI 兼容 Chat Completions 客户端
//!
//! 通过 reqwest 调用任意 OpenAI 兼容端点（可配置 base_url）；OpenAI、豆包（方舟）、通义千问、DeepSeek 共用。
//! 对话按角色映射：system / user / tool（带 tool_call_id）/ assistant（带 tool_calls）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, LlmResponse, LlmUsage};
use crate::memory::Message;
use crate::tools::{ToolArguments, ToolCall, ToolDefinition};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

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

#[derive(Deserialize)]
struct ChatCompletion {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    prompt_tokens_details: Option<PromptDetails>,
    completion_tokens_details: Option<CompletionDetails>,
}

#[derive(Deserialize)]
struct PromptDetails {
    cached_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct CompletionDetails {
    reasoning_tokens: Option<u64>,
}

impl From<WireUsage> for LlmUsage {
    fn from(u: WireUsage) -> Self {
        LlmUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: u.prompt_tokens_details.and_then(|d| d.cached_tokens).unwrap_or(0),
            reasoning_tokens: u.completion_tokens_details.and_then(|d| d.reasoning_tokens).unwrap_or(0),
        }
    }
}

/// 解析工具参数；非法 JSON 或非对象时返回空参数
fn parse_arguments(raw: &str) -> ToolArguments {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => ToolArguments::new(),
    }
}

/// 对话转为 API 消息格式
pub(crate) fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m {
            Message::System { content } | Message::Memory { content } => {
                json!({"role": "system", "content": content})
            }
            Message::User { content } => json!({"role": "user", "content": content}),
            Message::ToolResult { result } => json!({
                "role": "tool",
                "tool_call_id": result.call_id,
                "content": result.text(),
            }),
            Message::Assistant { content, tool_calls } => {
                let mut msg = json!({"role": "assistant", "content": content});
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.call_id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": Value::Object(c.arguments.clone()).to_string(),
                                }
                            })
                        })
                        .collect();
                }
                msg
            }
        })
        .collect()
}

fn to_wire_tools(tools: &[ToolDefinition], strict: bool) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            let mut function = json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            });
            if strict {
                function["strict"] = Value::Bool(true);
            }
            json!({"type": "function", "function": function})
        })
        .collect()
}

fn classify_status(status: StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::Auth(body),
        429 => LlmError::RateLimited(body),
        code => LlmError::Api { status: code, message: body },
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    http: Client,
    provider: String,
    base_url: String,
    model: String,
    api_key: String,
    strict_tools: bool,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(provider: &str, base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            provider: provider.to_string(),
            base_url: base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            strict_tools: false,
            usage: TokenUsage::new(),
        }
    }

    /// 启用结构化工具调用（strict schema）
    pub fn with_strict_tools(mut self, strict: bool) -> Self {
        self.strict_tools = strict;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolDefinition]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": to_wire_messages(messages),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(to_wire_tools(tools, self.strict_tools));
        }
        body
    }

    fn parse_response(&self, completion: ChatCompletion) -> Result<LlmResponse, LlmError> {
        let usage = completion.usage.map(LlmUsage::from);
        if let Some(u) = &usage {
            self.usage.add(u.input_tokens, u.output_tokens);
        }
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("响应中没有 choices".to_string()))?;
        let tool_calls = choice.message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|c| ToolCall::new(c.function.name, c.id, parse_arguments(&c.function.arguments)))
                .collect()
        });
        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: completion.model.or_else(|| Some(self.model.clone())),
            finish_reason: choice.finish_reason,
            tool_calls,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_request(messages, tools))
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let parsed = self.parse_response(completion)?;
        tracing::debug!(
            provider = %self.provider,
            model = %self.model,
            tool_calls = parsed.tool_calls.as_ref().map(|c| c.len()).unwrap_or(0),
            "llm chat completed"
        );
        Ok(parsed)
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;

    fn client() -> OpenAiClient {
        OpenAiClient::new("openai", Some("http://localhost:1/v1/"), "gpt-test", "sk-test", 5)
    }

    #[test]
    fn test_wire_messages_map_roles() {
        let mut args = ToolArguments::new();
        args.insert("command".into(), json!("ls"));
        let call = ToolCall::new("bash", "call_1", args);
        let messages = vec![
            Message::system("sys"),
            Message::memory("[记忆 - 最近对话]: user: hi"),
            Message::user("task"),
            Message::assistant_with_tools("", vec![call.clone()]),
            Message::tool_result(ToolResult::success(&call, "a.csv")),
        ];
        let wire = to_wire_messages(&messages);
        assert_eq!(wire[1]["role"], "system");
        assert_eq!(wire[3]["content"], Value::Null);
        assert_eq!(wire[3]["tool_calls"][0]["function"]["arguments"], r#"{"command":"ls"}"#);
        assert_eq!(wire[4]["role"], "tool");
        assert_eq!(wire[4]["tool_call_id"], "call_1");
        assert_eq!(wire[4]["content"], "a.csv");
    }

    #[test]
    fn test_parse_response_with_tool_calls_and_bad_arguments() {
        let raw = json!({
            "model": "gpt-test",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "c1", "type": "function", "function": {"name": "task_done", "arguments": "{\"summary\":\"pong\"}"}},
                        {"id": "c2", "type": "function", "function": {"name": "bash", "arguments": "not json"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "prompt_tokens_details": {"cached_tokens": 4}}
        });
        let c = client();
        let resp = c.parse_response(serde_json::from_value(raw).unwrap()).unwrap();
        let calls = resp.tool_calls.unwrap();
        assert_eq!(calls[0].arguments["summary"], "pong");
        assert!(calls[1].arguments.is_empty());
        assert_eq!(resp.content, "");
        let usage = resp.usage.unwrap();
        assert_eq!(usage.cache_read_input_tokens, 4);
        assert_eq!(c.token_usage(), (10, 2, 12));
    }

    #[test]
    fn test_empty_choices_is_invalid() {
        let c = client();
        let err = c.parse_response(serde_json::from_value(json!({"choices": []})).unwrap());
        assert!(matches!(err, Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, "x".into()), LlmError::Auth(_)));
        assert!(matches!(classify_status(StatusCode::TOO_MANY_REQUESTS, "x".into()), LlmError::RateLimited(_)));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, "x".into()),
            LlmError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_request_includes_strict_tools() {
        let c = client().with_strict_tools(true);
        let def = ToolDefinition {
            name: "task_done".into(),
            description: "done".into(),
            parameters: json!({"type": "object"}),
        };
        let body = c.build_request(&[Message::user("hi")], &[def]);
        assert_eq!(body["tools"][0]["function"]["strict"], true);
        assert_eq!(c.base_url(), "http://localhost:1/v1");
    }
}
