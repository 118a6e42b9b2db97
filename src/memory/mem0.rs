//! Mem0 平台记忆存储（HTTP）
//!
//! - 写入：POST /v1/memories/，session 记录在 metadata 中带 session_id，agent 记录以 agent_id 归属
//! - 检索：POST /v2/memories/search/，filters 为 {"OR":[{"user_id":…}]}；指定类别时为 {"AND":[归属, {"metadata":{"memory_type":…}}]}
//! - 清理：DELETE /v1/memories/?user_id=…
//!
//! 失败按状态码分类：429 或 insufficient_quota 为配额不足，400/401/403/422 为参数错误，其余为暂时性错误。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde_json::{json, Value};

use crate::memory::store::{MemoryClass, MemoryRecord, MemoryScope, MemoryStore, MemoryStoreError, SearchFilter};

pub const MEM0_BASE_URL: &str = "https://api.mem0.ai";
const AGENT_ID: &str = "bi-agent";

pub struct Mem0Store {
    http: Client,
    base_url: String,
    api_key: String,
}

impl Mem0Store {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, timeout_secs: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.unwrap_or(MEM0_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn auth(&self) -> String {
        format!("Token {}", self.api_key)
    }

    async fn check(response: Result<Response, reqwest::Error>) -> Result<Response, MemoryStoreError> {
        let response = response.map_err(|e| MemoryStoreError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status.as_u16(), body))
    }

    fn add_body(record: &MemoryRecord, scope: &MemoryScope) -> Value {
        let mut metadata = record.metadata.clone();
        metadata.insert("memory_type".into(), json!(record.class.as_str()));
        if record.class == MemoryClass::Session {
            if let Some(session) = &scope.session_id {
                metadata.insert("session_id".into(), json!(session));
            }
        }
        let mut body = json!({
            "messages": [{"role": "user", "content": record.content}],
            "metadata": metadata,
        });
        match record.class {
            MemoryClass::Agent => body["agent_id"] = json!(AGENT_ID),
            _ => body["user_id"] = json!(scope.user_id),
        }
        if let Some(expires) = record.expires_at {
            body["expiration_date"] = json!(expires.format("%Y-%m-%d").to_string());
        }
        body
    }

    /// 指定类别时在服务端按 metadata.memory_type 过滤，保证 top_k 条都属于该类别
    fn search_body(query: &str, filter: &SearchFilter, limit: usize) -> Value {
        let owner = match filter.class {
            Some(MemoryClass::Agent) => json!({"agent_id": AGENT_ID}),
            _ => json!({"user_id": filter.user_id}),
        };
        let filters = match filter.class {
            Some(class) => json!({"AND": [owner, {"metadata": {"memory_type": class.as_str()}}]}),
            None => json!({"OR": [owner]}),
        };
        json!({
            "query": query,
            "top_k": limit,
            "filters": filters,
        })
    }
}

pub(crate) fn classify(status: u16, body: String) -> MemoryStoreError {
    if status == 429 || body.contains("insufficient_quota") {
        return MemoryStoreError::QuotaExceeded(format!("{}: {}", status, body));
    }
    match status {
        400 | 401 | 403 | 422 => MemoryStoreError::InvalidArgument(format!("{}: {}", status, body)),
        _ => MemoryStoreError::Transient(format!("{}: {}", status, body)),
    }
}

/// 解析单条检索结果；内容字段依次尝试 memory / content / text
pub(crate) fn parse_record(item: &Value) -> Option<MemoryRecord> {
    let content = ["memory", "content", "text"]
        .iter()
        .find_map(|k| item.get(*k).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())?
        .to_string();
    let metadata: HashMap<String, Value> = item
        .get("metadata")
        .and_then(|m| m.as_object())
        .map(|m| m.clone().into_iter().collect())
        .unwrap_or_default();
    let class = match metadata.get("memory_type").and_then(|v| v.as_str()) {
        Some("session") => MemoryClass::Session,
        Some("agent") => MemoryClass::Agent,
        _ => MemoryClass::User,
    };
    let parse_time = |key: &str| {
        item.get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    };
    Some(MemoryRecord {
        content,
        class,
        metadata,
        created_at: parse_time("created_at").unwrap_or_else(Utc::now),
        expires_at: parse_time("expiration_date"),
        score: item.get("score").and_then(|v| v.as_f64()),
    })
}

#[async_trait]
impl MemoryStore for Mem0Store {
    async fn add(&self, record: MemoryRecord, scope: &MemoryScope) -> Result<(), MemoryStoreError> {
        let response = self
            .http
            .post(format!("{}/v1/memories/", self.base_url))
            .header("Authorization", self.auth())
            .json(&Self::add_body(&record, scope))
            .send()
            .await;
        Self::check(response).await.map(|_| ())
    }

    async fn search(&self, query: &str, filter: &SearchFilter, limit: usize) -> Result<Vec<MemoryRecord>, MemoryStoreError> {
        let body = Self::search_body(query, filter, limit);
        let response = self
            .http
            .post(format!("{}/v2/memories/search/", self.base_url))
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await;
        let value: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| MemoryStoreError::Transient(e.to_string()))?;
        let items = match &value {
            Value::Array(items) => items.as_slice(),
            Value::Object(obj) => obj.get("results").and_then(|r| r.as_array()).map(|r| r.as_slice()).unwrap_or(&[]),
            _ => &[],
        };
        Ok(items
            .iter()
            .filter_map(parse_record)
            .filter(|r| filter.class.map(|c| c == r.class).unwrap_or(true))
            .take(limit)
            .collect())
    }

    async fn delete_all(&self, scope: &MemoryScope) -> Result<(), MemoryStoreError> {
        let response = self
            .http
            .delete(format!("{}/v1/memories/", self.base_url))
            .header("Authorization", self.auth())
            .query(&[("user_id", scope.user_id.as_str())])
            .send()
            .await;
        Self::check(response).await.map(|_| ())
    }

    fn name(&self) -> &str {
        "mem0"
    }
}
