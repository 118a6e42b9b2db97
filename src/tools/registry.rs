//! 工具抽象与注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters / execute / close），
//! 由 ToolRegistry 按规范化名称（忽略大小写与下划线）注册与查找；
//! ToolExecutor 在调用时统一把工具错误转换为失败的 ToolResult。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ToolError;

/// 工具参数：字符串键到 JSON 值
pub type ToolArguments = Map<String, Value>;

/// LLM 发出的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// 关联调用与结果的标识
    pub call_id: String,
    #[serde(default)]
    pub arguments: ToolArguments,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, call_id: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            name: name.into(),
            call_id: call_id.into(),
            arguments,
        }
    }

    /// 取字符串参数；空字符串视为缺失
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// 一次工具调用的结果：成功时 result 有值，失败时 error 有值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            success: true,
            result: Some(output.into()),
            error: None,
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// 发给 LLM 的文本：成功取 result，失败取 error
    pub fn text(&self) -> &str {
        if self.success {
            self.result.as_deref().unwrap_or("")
        } else {
            self.error.as_deref().unwrap_or("")
        }
    }
}

/// 工具执行的中间结果（error_code 非 0 视为失败）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolOutput {
    pub output: Option<String>,
    pub error: Option<String>,
    pub error_code: i32,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            error: None,
            error_code: 0,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(error.into()),
            error_code: -1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }

    /// 转为 ToolResult；失败时把已有输出附在错误后面，保证 result/error 二选一
    pub fn into_result(self, call: &ToolCall) -> ToolResult {
        if self.is_success() {
            return ToolResult::success(call, self.output.unwrap_or_default());
        }
        let error = match (self.error.filter(|e| !e.is_empty()), self.output.filter(|o| !o.is_empty())) {
            (Some(e), Some(o)) => format!("{}\n输出:\n{}", e, o),
            (Some(e), None) => e,
            (None, Some(o)) => format!("退出码 {}\n输出:\n{}", self.error_code, o),
            (None, None) => format!("退出码 {}", self.error_code),
        };
        ToolResult::failure(call, error)
    }
}

/// 参数声明
#[derive(Clone, Debug, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    /// JSON Schema 类型，如 "string"、"boolean"、"array"
    pub param_type: String,
    pub description: String,
    pub enum_values: Option<Vec<String>>,
    pub items: Option<Value>,
    pub required: bool,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            enum_values: None,
            items: None,
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_items(mut self, items: Value) -> Self {
        self.items = Some(items);
        self
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }
}

/// Schema 风格：Strict 对应 OpenAI 结构化工具调用（全部参数必填、可选参数允许 null、禁止额外字段）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchemaFlavor {
    #[default]
    Standard,
    Strict,
}

/// 发送给 LLM 的工具定义
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 由参数声明生成 JSON Schema
pub fn input_schema(parameters: &[ToolParameter], flavor: SchemaFlavor) -> Value {
    let strict = flavor == SchemaFlavor::Strict;
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in parameters {
        let mut prop = Map::new();
        let ty = if strict && !param.required {
            Value::from(vec![param.param_type.clone(), "null".to_string()])
        } else {
            Value::from(param.param_type.clone())
        };
        prop.insert("type".into(), ty);
        prop.insert("description".into(), Value::from(param.description.clone()));
        if let Some(values) = &param.enum_values {
            prop.insert("enum".into(), Value::from(values.clone()));
        }
        if let Some(items) = &param.items {
            prop.insert("items".into(), items.clone());
        }
        if strict && param.param_type == "object" {
            prop.insert("additionalProperties".into(), Value::Bool(false));
        }
        if strict || param.required {
            required.push(Value::from(param.name.clone()));
        }
        properties.insert(param.name.clone(), Value::Object(prop));
    }

    let mut schema = Map::new();
    schema.insert("type".into(), Value::from("object"));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    if strict {
        schema.insert("additionalProperties".into(), Value::Bool(false));
    }
    Value::Object(schema)
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数声明、异步执行、可选的资源释放
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ToolParameter>;

    async fn execute(&self, args: &ToolArguments) -> Result<ToolOutput, ToolError>;

    /// 释放资源（如关闭 shell 会话）；默认无事可做
    async fn close(&self) -> Result<(), ToolError> {
        Ok(())
    }

    fn definition(&self, flavor: SchemaFlavor) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: input_schema(&self.parameters(), flavor),
        }
    }
}

/// 规范化工具名：小写并去掉下划线
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace('_', "")
}

/// 工具注册表：构造后只读；保留注册顺序用于展示与定义列表
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register_arc(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 同名（规范化后）工具会被替换
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let key = normalize_name(tool.name());
        match self.index.get(&key) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(key, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index
            .get(&normalize_name(name))
            .map(|&i| self.tools[i].clone())
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn definitions(&self, flavor: SchemaFlavor) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition(flavor)).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("command", "string", "要运行的命令"),
            ToolParameter::optional("restart", "boolean", "重启会话"),
            ToolParameter::optional("charts", "array", "图表路径").with_items(json!({"type": "string"})),
        ]
    }

    #[test]
    fn test_standard_schema_lists_only_required() {
        let schema = input_schema(&params(), SchemaFlavor::Standard);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["command"]));
        assert_eq!(schema["properties"]["restart"]["type"], "boolean");
        assert_eq!(schema["properties"]["charts"]["items"], json!({"type": "string"}));
        assert!(schema.get("additionalProperties").is_none());
    }

    #[test]
    fn test_strict_schema_makes_optional_nullable() {
        let schema = input_schema(&params(), SchemaFlavor::Strict);
        assert_eq!(schema["required"], json!(["command", "restart", "charts"]));
        assert_eq!(schema["properties"]["restart"]["type"], json!(["boolean", "null"]));
        assert_eq!(schema["properties"]["command"]["type"], "string");
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn test_enum_is_rendered() {
        let p = vec![ToolParameter::required("format", "string", "格式").with_enum(&["markdown", "json"])];
        let schema = input_schema(&p, SchemaFlavor::Standard);
        assert_eq!(schema["properties"]["format"]["enum"], json!(["markdown", "json"]));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Task_Done"), "taskdone");
        assert_eq!(normalize_name("taskdone"), "taskdone");
    }

    #[test]
    fn test_tool_output_failure_keeps_xor() {
        let call = ToolCall::new("bash", "c1", ToolArguments::new());
        let out = ToolOutput {
            output: Some("partial".into()),
            error: Some("bad".into()),
            error_code: 2,
        };
        let result = out.into_result(&call);
        assert!(!result.success);
        assert!(result.result.is_none());
        assert_eq!(result.error.as_deref(), Some("bad\n输出:\npartial"));
    }
}
