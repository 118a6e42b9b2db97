//! 记忆层：对话消息、外部记忆存储（Mem0 / 本地）、记忆管理器与快照持久化

pub mod conversation;
pub mod local;
pub mod manager;
pub mod mem0;
pub mod persistence;
pub mod store;

pub use conversation::{Message, Role};
pub use local::LocalMemoryStore;
pub use manager::MemoryManager;
pub use mem0::Mem0Store;
pub use persistence::{MemorySnapshot, SnapshotStore};
pub use store::{MemoryClass, MemoryRecord, MemoryScope, MemoryStore, MemoryStoreError, SearchFilter};
