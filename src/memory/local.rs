//! 进程内记忆存储：jieba 分词后按关键词重叠打分，无需外部服务
//!
//! 中文使用 jieba 搜索引擎模式切词，英文按空格切词；过期记录在检索时被跳过，写入时被清理。

use std::collections::HashSet;
use std::sync::{OnceLock, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use jieba_rs::Jieba;

use crate::memory::store::{MemoryRecord, MemoryScope, MemoryStore, MemoryStoreError, SearchFilter};

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}'
    )
}

/// 关键词集合（小写，过滤单个非中文字符）
pub fn keywords(text: &str) -> HashSet<String> {
    let text = text.trim();
    let words: Vec<String> = if text.chars().any(is_cjk) {
        JIEBA
            .get_or_init(Jieba::new)
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .collect()
    } else {
        text.split_whitespace().map(|s| s.to_lowercase()).collect()
    };
    words
        .into_iter()
        .filter(|w| w.chars().count() > 1 || w.chars().next().map(is_cjk).unwrap_or(false))
        .collect()
}

struct Entry {
    record: MemoryRecord,
    user_id: String,
    session_id: Option<String>,
    keywords: HashSet<String>,
}

pub struct LocalMemoryStore {
    entries: RwLock<Vec<Entry>>,
    max_entries: usize,
}

impl LocalMemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalMemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl MemoryStore for LocalMemoryStore {
    async fn add(&self, record: MemoryRecord, scope: &MemoryScope) -> Result<(), MemoryStoreError> {
        if record.content.trim().is_empty() {
            return Ok(());
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|e| MemoryStoreError::Transient(e.to_string()))?;
        let now = Utc::now();
        entries.retain(|e| !e.record.is_expired(now));
        entries.push(Entry {
            keywords: keywords(&record.content),
            record,
            user_id: scope.user_id.clone(),
            session_id: scope.session_id.clone(),
        });
        let n = entries.len();
        if n > self.max_entries {
            entries.drain(0..n - self.max_entries);
        }
        Ok(())
    }

    async fn search(&self, query: &str, filter: &SearchFilter, limit: usize) -> Result<Vec<MemoryRecord>, MemoryStoreError> {
        let query_words = keywords(query);
        if query_words.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let entries = self
            .entries
            .read()
            .map_err(|e| MemoryStoreError::Transient(e.to_string()))?;
        let now = Utc::now();
        let mut scored: Vec<(usize, &Entry)> = entries
            .iter()
            .filter(|e| e.user_id == filter.user_id)
            .filter(|e| filter.class.map(|c| c == e.record.class).unwrap_or(true))
            .filter(|e| !e.record.is_expired(now))
            .map(|e| (query_words.intersection(&e.keywords).count(), e))
            .filter(|(s, _)| *s > 0)
            .collect();
        // 同分时新的在前
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.record.created_at.cmp(&a.1.record.created_at)));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(s, e)| {
                let mut record = e.record.clone();
                record.score = Some(s as f64 / query_words.len() as f64);
                record
            })
            .collect())
    }

    async fn delete_all(&self, scope: &MemoryScope) -> Result<(), MemoryStoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| MemoryStoreError::Transient(e.to_string()))?;
        entries.retain(|e| {
            e.user_id != scope.user_id
                || scope.session_id.as_ref().map(|s| e.session_id.as_ref() != Some(s)).unwrap_or(false)
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}
