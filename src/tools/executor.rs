//! 工具执行器
//!
//! 持有 ToolRegistry，execute_one(call) 永不失败：未知工具、工具返回 Err、工具 panic 都转为失败的 ToolResult；
//! 每次调用输出结构化审计日志（JSON）。超时由各工具自行负责。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use futures_util::FutureExt;

use crate::core::{panic_message, preview};
use crate::tools::registry::{SchemaFlavor, Tool, ToolCall, ToolDefinition, ToolRegistry, ToolResult};

/// 工具执行器：按名称分发调用，并将一切结果映射为 ToolResult
pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self::new(ToolRegistry::from_tools(tools))
    }

    /// 执行单个调用，结果的 call_id 与调用一致
    pub async fn execute_one(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let (result, outcome) = match self.registry.get(&call.name) {
            None => (
                ToolResult::failure(
                    call,
                    format!(
                        "工具 '{}' 未找到。可用工具: [{}]",
                        call.name,
                        self.tool_names()
                            .iter()
                            .map(|n| format!("'{}'", n))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                ),
                "not_found",
            ),
            Some(tool) => match AssertUnwindSafe(tool.execute(&call.arguments)).catch_unwind().await {
                Ok(Ok(output)) => {
                    let outcome = if output.is_success() { "ok" } else { "error" };
                    (output.into_result(call), outcome)
                }
                Ok(Err(e)) => (
                    ToolResult::failure(call, format!("执行工具 '{}' 时出错: {}", call.name, e)),
                    "exception",
                ),
                Err(panic) => (
                    ToolResult::failure(
                        call,
                        format!("执行工具 '{}' 时崩溃: {}", call.name, panic_message(panic.as_ref())),
                    ),
                    "panic",
                ),
            },
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.call_id,
            "ok": result.success,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(call),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    /// 按顺序逐个执行：后一个调用开始前前一个已结束
    pub async fn execute_sequential(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute_one(call).await);
        }
        results
    }

    /// 并发执行，结果顺序与调用顺序一致
    pub async fn execute_parallel(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|c| self.execute_one(c))).await
    }

    /// 关闭所有工具；单个工具关闭失败只记录日志
    pub async fn close_all(&self) {
        let tools = self.registry.tools();
        let outcomes = join_all(tools.iter().map(|t| t.close())).await;
        for (tool, outcome) in tools.iter().zip(outcomes) {
            if let Err(e) = outcome {
                tracing::warn!(tool = %tool.name(), error = %e, "tool close failed");
            }
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn definitions(&self, flavor: SchemaFlavor) -> Vec<ToolDefinition> {
        self.registry.definitions(flavor)
    }
}

fn args_preview(call: &ToolCall) -> String {
    preview(&serde_json::Value::Object(call.arguments.clone()).to_string(), 200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolError;
    use crate::tools::registry::{ToolArguments, ToolOutput, ToolParameter};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo_text"
        }
        fn description(&self) -> &str {
            "回显 text 参数"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![ToolParameter::required("text", "string", "内容")]
        }
        async fn execute(&self, args: &ToolArguments) -> Result<ToolOutput, ToolError> {
            match args.get("text").and_then(|v| v.as_str()) {
                Some(t) => Ok(ToolOutput::ok(t)),
                None => Err(ToolError::InvalidArguments("缺少 text".into())),
            }
        }
    }

    /// 记录进入与退出顺序，用于验证顺序执行
    struct Tracker {
        log: Arc<Mutex<Vec<String>>>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Tracker {
        fn name(&self) -> &str {
            "tracker"
        }
        fn description(&self) -> &str {
            "记录调用"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(&self, args: &ToolArguments) -> Result<ToolOutput, ToolError> {
            let id = args.get("id").and_then(|v| v.as_str()).unwrap_or("?").to_string();
            self.log.lock().await.push(format!("start {}", id));
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.log.lock().await.push(format!("end {}", id));
            Ok(ToolOutput::ok(id))
        }
        async fn close(&self) -> Result<(), ToolError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(ToolError::Execution("close failed".into()))
        }
    }

    struct Boom;

    #[async_trait]
    impl Tool for Boom {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "越界访问"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(&self, args: &ToolArguments) -> Result<ToolOutput, ToolError> {
            let empty: Vec<u8> = Vec::new();
            let idx = args.get("idx").and_then(|v| v.as_u64()).unwrap_or(3) as usize;
            Ok(ToolOutput::ok(empty[idx].to_string()))
        }
    }

    fn call(name: &str, id: &str, args: serde_json::Value) -> ToolCall {
        let arguments = match args {
            serde_json::Value::Object(m) => m,
            _ => ToolArguments::new(),
        };
        ToolCall::new(name, id, arguments)
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_available() {
        let exec = ToolExecutor::from_tools(vec![Arc::new(Echo)]);
        let r = exec.execute_one(&call("nope", "c1", json!({}))).await;
        assert!(!r.success);
        assert_eq!(r.call_id, "c1");
        let err = r.error.unwrap_or_default();
        assert!(err.contains("'nope'"));
        assert!(err.contains("echo_text"));
    }

    #[tokio::test]
    async fn test_name_lookup_is_normalized() {
        let exec = ToolExecutor::from_tools(vec![Arc::new(Echo)]);
        let r = exec.execute_one(&call("EchoText", "c1", json!({"text": "hi"}))).await;
        assert!(r.success);
        assert_eq!(r.result.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_tool_error_becomes_failure() {
        let exec = ToolExecutor::from_tools(vec![Arc::new(Echo)]);
        let r = exec.execute_one(&call("echo_text", "c2", json!({}))).await;
        assert!(!r.success);
        assert!(r.result.is_none());
        assert!(r.error.unwrap_or_default().starts_with("执行工具 'echo_text' 时出错"));
    }

    #[tokio::test]
    async fn test_sequential_does_not_overlap() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));
        let exec = ToolExecutor::from_tools(vec![Arc::new(Tracker {
            log: log.clone(),
            closes: closes.clone(),
        })]);
        let calls = vec![
            call("tracker", "a", json!({"id": "a"})),
            call("tracker", "b", json!({"id": "b"})),
        ];
        let results = exec.execute_sequential(&calls).await;
        assert_eq!(results.iter().map(|r| r.call_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(*log.lock().await, vec!["start a", "end a", "start b", "end b"]);

        exec.close_all().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parallel_preserves_order() {
        let exec = ToolExecutor::from_tools(vec![Arc::new(Echo)]);
        let calls = vec![
            call("echo_text", "1", json!({"text": "x"})),
            call("missing", "2", json!({})),
            call("echo_text", "3", json!({"text": "z"})),
        ];
        let results = exec.execute_parallel(&calls).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].result.as_deref(), Some("x"));
        assert!(!results[1].success);
        assert_eq!(results[2].call_id, "3");
    }

    #[tokio::test]
    async fn test_panicking_tool_is_contained_per_call() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exec = ToolExecutor::from_tools(vec![
            Arc::new(Boom),
            Arc::new(Tracker {
                log: log.clone(),
                closes: Arc::new(AtomicUsize::new(0)),
            }),
        ]);
        let calls = vec![call("boom", "p1", json!({})), call("tracker", "p2", json!({"id": "after"}))];
        let results = exec.execute_sequential(&calls).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].call_id, "p1");
        assert!(!results[0].success);
        let err = results[0].error.clone().unwrap_or_default();
        assert!(err.starts_with("执行工具 'boom' 时崩溃"));
        assert!(err.contains("index out of bounds"));
        assert!(results[1].success);
        assert_eq!(results[1].result.as_deref(), Some("after"));
        assert_eq!(*log.lock().await, vec!["start after", "end after"]);
    }
}
