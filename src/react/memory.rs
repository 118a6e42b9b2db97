//! 每步的记忆上下文拼接
//!
//! 每次调用 LLM 前：检索到的相关记忆 + 最近几条交互的摘要，作为临时 Memory 消息插入到
//! 第一条 system 消息之后（没有 system 消息时放在最前）。临时消息从不写回历史，下一步重新计算。

use serde_json::Value;

use crate::config::AgentSection;
use crate::core::preview;
use crate::memory::Message;

/// 最近交互摘要的前缀
pub const RECENT_LABEL: &str = "[记忆 - 最近对话]";

/// 最近交互窗口：回溯最多 scan_limit 条，实际注入最后 keep 条
#[derive(Clone, Debug)]
pub struct ContextWindow {
    pub scan_limit: usize,
    pub keep: usize,
    pub preview_chars: usize,
    pub args_preview_chars: usize,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self::from_config(&AgentSection::default())
    }
}

impl ContextWindow {
    pub fn from_config(agent: &AgentSection) -> Self {
        Self {
            scan_limit: agent.recent_scan_limit,
            keep: agent.recent_keep,
            preview_chars: agent.preview_chars,
            args_preview_chars: agent.args_preview_chars,
        }
    }

    /// 单条消息的一行摘要：(角色标签, 内容)；不参与摘要的消息返回 None
    fn digest_one(&self, message: &Message) -> Option<(&'static str, String)> {
        match message {
            Message::ToolResult { result } => {
                let outcome = if result.success {
                    match result.result.as_deref().filter(|r| !r.is_empty()) {
                        Some(r) => format!("成功: {}", preview(r, self.preview_chars)),
                        None => "成功（无返回内容）".to_string(),
                    }
                } else {
                    let error = result.error.as_deref().filter(|e| !e.is_empty()).unwrap_or("未知错误");
                    format!("失败: {}", preview(error, self.preview_chars))
                };
                Some(("tool_result", format!("工具 {} 执行结果 | {}", result.name, outcome)))
            }
            Message::Assistant { content, tool_calls } => {
                let mut parts = Vec::new();
                if let Some(text) = content.as_deref().filter(|c| !c.is_empty()) {
                    parts.push(format!("响应: {}", preview(text, self.preview_chars)));
                }
                if !tool_calls.is_empty() {
                    let calls: Vec<String> = tool_calls
                        .iter()
                        .map(|call| {
                            if call.arguments.is_empty() {
                                format!("调用工具 {}", call.name)
                            } else {
                                let args = Value::Object(call.arguments.clone()).to_string();
                                format!("调用工具 {} (参数: {})", call.name, preview(&args, self.args_preview_chars))
                            }
                        })
                        .collect();
                    parts.push(format!("工具调用: {}", calls.join("; ")));
                }
                (!parts.is_empty()).then(|| ("assistant", parts.join(" | ")))
            }
            Message::User { content } if !content.is_empty() => Some(("user", preview(content, self.preview_chars))),
            _ => None,
        }
    }

    /// 最近交互摘要（时间顺序），跳过记忆消息与首条 user 消息（任务提示）
    pub fn recent_digests(&self, history: &[Message]) -> Vec<Message> {
        let task_index = history.iter().position(|m| matches!(m, Message::User { .. }));
        let mut collected = Vec::new();
        for (index, message) in history.iter().enumerate().rev() {
            if collected.len() >= self.scan_limit {
                break;
            }
            if message.is_memory() || Some(index) == task_index {
                continue;
            }
            if let Some(digest) = self.digest_one(message) {
                collected.push(digest);
            }
        }
        collected.reverse();
        let skip = collected.len().saturating_sub(self.keep);
        collected
            .into_iter()
            .skip(skip)
            .map(|(role, content)| Message::memory(format!("{}: {}: {}", RECENT_LABEL, role, content)))
            .collect()
    }

    /// 本步发给 LLM 的对话：相关记忆在前，最近交互在后，一起插入历史
    pub fn assemble(&self, history: &[Message], relevant: Vec<Message>) -> Vec<Message> {
        let mut memories = relevant;
        memories.extend(self.recent_digests(history));
        splice(history, memories)
    }
}

/// 去掉历史中已有的记忆消息，再把 memories 插到第一条 system 消息之后（没有则放最前）
pub fn splice(history: &[Message], memories: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = history.iter().filter(|m| !m.is_memory()).cloned().collect();
    let at = out
        .iter()
        .position(|m| matches!(m, Message::System { .. }))
        .map(|i| i + 1)
        .unwrap_or(0);
    out.splice(at..at, memories);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolArguments, ToolCall, ToolResult};
    use serde_json::json;

    fn call(name: &str, args: Value) -> ToolCall {
        let arguments: ToolArguments = args.as_object().cloned().unwrap_or_default();
        ToolCall::new(name, format!("{}-1", name), arguments)
    }

    fn history() -> Vec<Message> {
        let bash = call("bash", json!({"command": "ls /data"}));
        vec![
            Message::system("你是数据分析助手"),
            Message::user("数据分析任务：统计销量"),
            Message::assistant_with_tools("先看看有哪些文件", vec![bash.clone()]),
            Message::tool_result(ToolResult::success(&bash, "sales.csv")),
            Message::assistant("文件已找到"),
        ]
    }

    #[test]
    fn test_recent_digests_keep_last_two_in_order() {
        let window = ContextWindow::default();
        let digests = window.recent_digests(&history());
        assert_eq!(digests.len(), 2);
        assert_eq!(
            digests[0].text(),
            "[记忆 - 最近对话]: tool_result: 工具 bash 执行结果 | 成功: sales.csv"
        );
        assert_eq!(digests[1].text(), "[记忆 - 最近对话]: assistant: 响应: 文件已找到");
        assert!(digests.iter().all(|m| m.is_memory()));
    }

    #[test]
    fn test_task_prompt_is_never_digested() {
        let window = ContextWindow {
            keep: 10,
            ..Default::default()
        };
        let digests = window.recent_digests(&history());
        assert_eq!(digests.len(), 3);
        assert!(digests.iter().all(|m| !m.text().contains("统计销量")));
        assert!(digests[0]
            .text()
            .ends_with(r#"响应: 先看看有哪些文件 | 工具调用: 调用工具 bash (参数: {"command":"ls /data"})"#));
    }

    #[test]
    fn test_scan_stops_after_limit() {
        let window = ContextWindow {
            scan_limit: 1,
            keep: 5,
            ..Default::default()
        };
        let digests = window.recent_digests(&history());
        assert_eq!(digests.len(), 1);
        assert!(digests[0].text().contains("文件已找到"));
    }

    #[test]
    fn test_failed_and_empty_results() {
        let c = call("python_executor", json!({}));
        let msgs = vec![
            Message::user("task"),
            Message::tool_result(ToolResult::failure(&c, "")),
            Message::tool_result(ToolResult::success(&c, "")),
        ];
        let digests = ContextWindow::default().recent_digests(&msgs);
        assert!(digests[0].text().ends_with("失败: 未知错误"));
        assert!(digests[1].text().ends_with("成功（无返回内容）"));
    }

    #[test]
    fn test_splice_after_first_system_and_strip_old_memories() {
        let mut hist = history();
        hist.insert(1, Message::memory("[记忆 - 最近对话]: stale"));
        let out = splice(&hist, vec![Message::memory("fresh")]);
        assert_eq!(out.len(), history().len() + 1);
        assert_eq!(out[1].text(), "fresh");
        assert!(!out.iter().any(|m| m.text().contains("stale")));
    }

    #[test]
    fn test_splice_without_system_goes_first() {
        let out = splice(&[Message::user("hi")], vec![Message::memory("m")]);
        assert_eq!(out[0].text(), "m");
        assert_eq!(out[1].text(), "hi");
    }

    #[test]
    fn test_assemble_orders_relevant_before_recent() {
        let window = ContextWindow::default();
        let out = window.assemble(&history(), vec![Message::memory("[记忆 - user]: 偏好柱状图")]);
        assert_eq!(out.len(), history().len() + 3);
        assert_eq!(out[1].text(), "[记忆 - user]: 偏好柱状图");
        assert!(out[2].text().starts_with(RECENT_LABEL));
        assert!(out[3].text().starts_with(RECENT_LABEL));
        assert_eq!(out[4].text(), "数据分析任务：统计销量");
    }
}
