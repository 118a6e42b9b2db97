//! 记忆快照持久化
//!
//! 将压缩摘要与最近 50 条滚动消息写入 JSON 文件，或从文件恢复到 MemoryManager。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::memory::{MemoryManager, Message};

/// 快照中保留的最近消息条数
pub const SNAPSHOT_RECENT: usize = 50;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub compressed_messages: Vec<Message>,
    #[serde(default)]
    pub recent_messages: Vec<Message>,
}

impl MemorySnapshot {
    pub fn capture(manager: &MemoryManager) -> Self {
        let history = manager.history();
        let start = history.len().saturating_sub(SNAPSHOT_RECENT);
        Self {
            compressed_messages: manager.compressed().to_vec(),
            recent_messages: history[start..].to_vec(),
        }
    }
}

/// 单文件 JSON 快照
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 写入快照；父目录不存在时自动创建
    pub fn save(&self, manager: &MemoryManager) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = MemorySnapshot::capture(manager);
        std::fs::write(&self.path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }

    /// 从文件恢复；文件不存在时不做任何修改并返回 false
    pub fn load_into(&self, manager: &mut MemoryManager) -> anyhow::Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let snapshot: MemorySnapshot = serde_json::from_str(&data)?;
        manager.restore(snapshot.compressed_messages, snapshot.recent_messages);
        Ok(true)
    }
}
