//! 错误类型
//!
//! AgentError 是步骤循环能看到的唯一错误类型：LLM 传输/鉴权失败与循环内部错误会终止本次执行，
//! 其余错误（工具失败、记忆服务失败）在各自边界被吸收为数据，不会越过组件边界。

use thiserror::Error;

use crate::llm::LlmError;

/// 步骤循环中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM 调用失败: {0}")]
    Llm(#[from] LlmError),

    #[error("未设置任务，请先调用 new_task")]
    NoTask,

    /// 循环内部的不变量被破坏（例如工具结果与调用数量不一致）
    #[error("内部错误: {0}")]
    Internal(String),

    #[error("配置错误: {0}")]
    Config(String),
}

/// 工具内部错误：由 ToolExecutor 捕获并转换为失败的 ToolResult，不会中断步骤
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    Execution(String),

    #[error("参数错误: {0}")]
    InvalidArguments(String),

    #[error("会话尚未启动")]
    NotStarted,

    #[error("超时：{secs} 秒内未返回，必须重启")]
    Timeout { secs: u64 },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 从 panic 负载中取出可读信息
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
