//! 外部记忆存储抽象
//!
//! MemoryStore 只暴露 add / search / delete_all 三个操作；失败以带类型的 MemoryStoreError 返回，
//! 由 MemoryManager 据此决定是否降级，不依赖错误消息的字符串匹配。

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 记忆类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryClass {
    /// 跨会话长期保留
    User,
    /// 仅限本次运行
    Session,
    /// 内部记录（保留，不参与检索）
    Agent,
}

impl MemoryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryClass::User => "user",
            MemoryClass::Session => "session",
            MemoryClass::Agent => "agent",
        }
    }
}

impl fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条记忆
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub content: String,
    pub class: MemoryClass,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// 检索得分（仅检索结果携带）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl MemoryRecord {
    pub fn new(content: impl Into<String>, class: MemoryClass) -> Self {
        Self {
            content: content.into(),
            class,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            expires_at: None,
            score: None,
        }
    }

    /// 超出时间可表示范围的 TTL 视为永不过期
    pub fn with_ttl_hours(mut self, hours: Option<u64>) -> Self {
        self.expires_at = hours
            .and_then(|h| i64::try_from(h).ok())
            .and_then(Duration::try_hours)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl));
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// 写入/删除的作用域：用户 + 可选会话
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryScope {
    pub user_id: String,
    pub session_id: Option<String>,
}

/// 检索过滤条件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchFilter {
    pub user_id: String,
    pub class: Option<MemoryClass>,
}

/// 记忆存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryStoreError {
    /// 配额耗尽或被限流
    #[error("记忆服务配额不足: {0}")]
    QuotaExceeded(String),

    /// 请求参数或凭据不被接受
    #[error("记忆服务参数错误: {0}")]
    InvalidArgument(String),

    /// 网络抖动、服务端错误等
    #[error("记忆服务暂时不可用: {0}")]
    Transient(String),
}

impl MemoryStoreError {
    /// 是否应永久降级到本地模式
    pub fn should_degrade(&self) -> bool {
        matches!(self, MemoryStoreError::QuotaExceeded(_) | MemoryStoreError::InvalidArgument(_))
    }
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add(&self, record: MemoryRecord, scope: &MemoryScope) -> Result<(), MemoryStoreError>;

    async fn search(&self, query: &str, filter: &SearchFilter, limit: usize) -> Result<Vec<MemoryRecord>, MemoryStoreError>;

    /// 删除该用户（及会话）的全部记忆
    async fn delete_all(&self, scope: &MemoryScope) -> Result<(), MemoryStoreError>;

    fn name(&self) -> &str;
}
