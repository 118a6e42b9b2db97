//! BI-Agent - Rust 数据分析智能体
//!
//! 模块划分：
//! - **agent**: Agent 门面（默认工具、初始提示、轨迹起止）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、执行/步骤状态
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / 提供方工厂 / 脚本化 Mock）
//! - **memory**: 对话消息、外部记忆存储、记忆管理器
//! - **react**: 步骤循环、记忆上下文拼接、完成判定
//! - **tools**: 工具箱（bash、python_executor、search_knowledge、report_generator、task_done）与执行器
//! - **trajectory**: 执行轨迹记录

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod prompts;
pub mod react;
pub mod tools;
pub mod trajectory;

pub use agent::{Agent, AgentOptions};
pub use core::{AgentExecution, AgentState};
