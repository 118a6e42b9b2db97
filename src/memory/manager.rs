//! 记忆管理器：滚动消息历史、历史压缩、外部记忆读写与降级
//!
//! - add_message 追加到滚动列表，超过阈值时把最旧的一部分压缩为一条摘要
//! - add_memory / search_memory 走外部 MemoryStore；配额或参数类错误会让本实例永久降级为本地模式
//! - 降级后检索只在最近 fallback_window 条消息里做不区分大小写的子串匹配
//! - clear_session_memory 总是先清空进程内列表，外部删除失败只记录 debug 日志

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::MemoryConfig;
use crate::core::preview;
use crate::memory::conversation::Message;
use crate::memory::store::{MemoryClass, MemoryRecord, MemoryScope, MemoryStore, SearchFilter};

pub const COMPRESSED_PREFIX: &str = "[压缩的历史消息摘要]\n";

pub struct MemoryManager {
    config: MemoryConfig,
    user_id: String,
    session_id: String,
    store: Option<Arc<dyn MemoryStore>>,
    degraded: bool,
    history: Vec<Message>,
    compressed: Vec<Message>,
}

impl MemoryManager {
    /// store 为 None 时从一开始就处于本地模式
    pub fn new(
        config: MemoryConfig,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        store: Option<Arc<dyn MemoryStore>>,
    ) -> Self {
        let degraded = store.is_none();
        if degraded {
            tracing::warn!(event = "memory_degraded", reason = "no_store", "memory store unavailable, using local history only");
        }
        Self {
            config,
            user_id: user_id.into(),
            session_id: session_id.into(),
            store,
            degraded,
            history: Vec::new(),
            compressed: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn compressed(&self) -> &[Message] {
        &self.compressed
    }

    fn scope(&self) -> MemoryScope {
        MemoryScope {
            user_id: self.user_id.clone(),
            session_id: Some(self.session_id.clone()),
        }
    }

    fn degrade(&mut self, reason: &str) {
        if !self.degraded {
            tracing::warn!(event = "memory_degraded", reason = %reason, "memory store disabled for the rest of this run");
            self.degraded = true;
        }
    }

    /// 追加消息；超过压缩阈值时触发压缩
    pub async fn add_message(&mut self, message: Message) {
        if message.is_memory() {
            return;
        }
        self.history.push(message);
        if self.config.enable_compression && self.history.len() > self.config.compression_threshold {
            self.compress().await;
        }
    }

    /// 压缩最旧的 total - keep 条消息为一条摘要
    pub async fn compress(&mut self) {
        let total = self.history.len();
        let keep = (total as f64 * (1.0 - self.config.compression_ratio)).floor() as usize;
        let count = total.saturating_sub(keep);
        if count == 0 {
            return;
        }
        let digest = digest(&self.history[..count]);
        self.history.drain(..count);
        self.compressed.push(Message::system(format!("{}{}", COMPRESSED_PREFIX, digest)));
        tracing::debug!(compressed = count, kept = self.history.len(), "memory history compressed");

        let mut metadata = HashMap::new();
        metadata.insert("type".to_string(), json!("compressed_history"));
        metadata.insert("message_count".to_string(), json!(count));
        self.add_memory(&digest, MemoryClass::Session, metadata).await;
    }

    /// 尽力写入外部记忆；不返回错误
    pub async fn add_memory(&mut self, content: &str, class: MemoryClass, metadata: HashMap<String, Value>) {
        if self.degraded {
            return;
        }
        let Some(store) = self.store.clone() else {
            return;
        };
        let ttl = match class {
            MemoryClass::Session => self.config.short_term_ttl_hours,
            MemoryClass::User => self.config.long_term_ttl_hours,
            MemoryClass::Agent => None,
        };
        let record = MemoryRecord::new(content, class)
            .with_ttl_hours(ttl)
            .with_metadata(metadata);
        if let Err(e) = store.add(record, &self.scope()).await {
            tracing::warn!(store = %store.name(), class = %class, error = %e, "add memory failed");
            if e.should_degrade() {
                self.degrade(&e.to_string());
            }
        }
    }

    /// 检索记忆；配额类错误降级并改用本地检索，其他错误返回空
    pub async fn search_memory(&mut self, query: &str, limit: usize, class: Option<MemoryClass>) -> Vec<MemoryRecord> {
        if self.degraded {
            return self.fallback_search(query, limit);
        }
        let Some(store) = self.store.clone() else {
            return self.fallback_search(query, limit);
        };
        let filter = SearchFilter {
            user_id: self.user_id.clone(),
            class,
        };
        match store.search(query, &filter, limit).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(store = %store.name(), error = %e, "search memory failed");
                if e.should_degrade() {
                    self.degrade(&e.to_string());
                    self.fallback_search(query, limit)
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// 本地检索：最近 fallback_window 条消息中的子串匹配（不区分大小写）
    fn fallback_search(&self, query: &str, limit: usize) -> Vec<MemoryRecord> {
        let query = query.to_lowercase();
        let start = self.history.len().saturating_sub(self.config.fallback_window);
        self.history[start..]
            .iter()
            .filter(|m| {
                let text = m.text();
                !text.is_empty() && text.to_lowercase().contains(&query)
            })
            .take(limit)
            .map(|m| {
                let mut record = MemoryRecord::new(m.text(), MemoryClass::Session);
                record.metadata.insert("role".to_string(), json!(m.role().as_str()));
                record
            })
            .collect()
    }

    /// 相关记忆转为临时 Memory 消息
    pub async fn get_relevant_memories(&mut self, query: &str) -> Vec<Message> {
        let limit = self.config.retrieval_limit;
        self.search_memory(query, limit, None)
            .await
            .into_iter()
            .map(|r| {
                let label = r
                    .metadata
                    .get("memory_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or(r.class.as_str())
                    .to_string();
                Message::memory(format!("[记忆 - {}]: {}", label, r.content))
            })
            .collect()
    }

    /// 压缩摘要在前、滚动列表在后；max 限制返回最近的条数
    pub fn messages(&self, include_compressed: bool, max: Option<usize>) -> Vec<Message> {
        let mut all: Vec<Message> = Vec::new();
        if include_compressed {
            all.extend(self.compressed.iter().cloned());
        }
        all.extend(self.history.iter().cloned());
        if let Some(max) = max.filter(|m| *m > 0) {
            let skip = all.len().saturating_sub(max);
            all.drain(..skip);
        }
        all
    }

    /// 清空会话记忆：进程内列表必定清空，外部删除尽力而为
    pub async fn clear_session_memory(&mut self) {
        self.history.clear();
        self.compressed.clear();
        if self.degraded {
            return;
        }
        if let Some(store) = self.store.clone() {
            if let Err(e) = store.delete_all(&self.scope()).await {
                tracing::debug!(store = %store.name(), error = %e, "delete session memory failed");
            }
        }
    }

    /// 由快照恢复
    pub fn restore(&mut self, compressed: Vec<Message>, history: Vec<Message>) {
        self.compressed = compressed;
        self.history = history;
    }
}

/// 提取一段消息的关键信息：工具调用、工具结果、普通对话，各类条数有上限
pub fn digest(messages: &[Message]) -> String {
    let mut calls = Vec::new();
    let mut results = Vec::new();
    let mut turns = Vec::new();

    for message in messages {
        match message {
            Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                for call in tool_calls {
                    calls.push(format!(
                        "- 调用工具 {}，参数: {}",
                        call.name,
                        Value::Object(call.arguments.clone())
                    ));
                }
            }
            Message::ToolResult { result } => {
                if result.success {
                    results.push(format!(
                        "- 工具 {} 执行成功: {}...",
                        result.name,
                        crate::core::truncate(result.text(), 200)
                    ));
                } else {
                    results.push(format!("- 工具 {} 执行失败: {}", result.name, result.text()));
                }
            }
            Message::Assistant { .. } | Message::User { .. } if !message.text().is_empty() => {
                turns.push(format!("[{}]: {}", message.role().as_str(), preview(message.text(), 100)));
            }
            _ => {}
        }
    }

    let mut parts = Vec::new();
    if !calls.is_empty() {
        parts.push("工具调用记录：".to_string());
        parts.extend(calls.into_iter().take(10));
    }
    if !results.is_empty() {
        parts.push("\n工具执行结果：".to_string());
        parts.extend(results.into_iter().take(10));
    }
    if !turns.is_empty() {
        parts.push("\n关键对话内容：".to_string());
        parts.extend(turns.into_iter().take(20));
    }
    if parts.is_empty() {
        "无关键信息".to_string()
    } else {
        parts.join("\n")
    }
}
