//! 执行轨迹记录
//!
//! 循环在开始、每步结束、整体结束时通知 TrajectoryRecorder；记录失败只打日志，不影响执行。
//! - TracingRecorder：把每步渲染为 tracing 事件
//! - InMemoryRecorder：在内存中保留可序列化的 Trajectory（测试、聊天桥接使用）

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{preview, AgentStep};
use crate::llm::LlmResponse;
use crate::memory::Message;
use crate::tools::{ToolCall, ToolResult};

/// 一次运行的起始信息
#[derive(Clone, Debug, Serialize)]
pub struct RunMetadata {
    pub task: String,
    pub provider: String,
    pub model: String,
    pub max_steps: usize,
    pub data_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

/// 单步记录：发给 LLM 的完整对话、响应、工具调用与结果
#[derive(Clone, Debug, Serialize)]
pub struct StepRecord {
    pub step_number: usize,
    pub state: String,
    pub messages: Vec<Message>,
    pub llm_response: Option<LlmResponse>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_results: Option<Vec<ToolResult>>,
    pub reflection: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    pub fn from_step(step: &AgentStep, messages: &[Message]) -> Self {
        Self {
            step_number: step.step_number,
            state: step.state.label().to_string(),
            messages: messages.to_vec(),
            llm_response: step.llm_response.clone(),
            tool_calls: step.tool_calls.clone(),
            tool_results: step.tool_results.clone(),
            reflection: step.reflection.clone(),
            error: step.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait TrajectoryRecorder: Send + Sync {
    async fn start(&self, metadata: &RunMetadata) -> anyhow::Result<()>;

    async fn record_step(&self, record: &StepRecord) -> anyhow::Result<()>;

    async fn end(&self, success: bool, final_result: Option<&str>) -> anyhow::Result<()>;
}

/// 以 tracing 事件输出轨迹
#[derive(Clone, Debug)]
pub struct TracingRecorder {
    preview_chars: usize,
}

impl Default for TracingRecorder {
    fn default() -> Self {
        Self { preview_chars: 300 }
    }
}

impl TracingRecorder {
    pub fn new(preview_chars: usize) -> Self {
        Self { preview_chars }
    }
}

#[async_trait]
impl TrajectoryRecorder for TracingRecorder {
    async fn start(&self, metadata: &RunMetadata) -> anyhow::Result<()> {
        tracing::info!(
            event = "trajectory_start",
            provider = %metadata.provider,
            model = %metadata.model,
            max_steps = metadata.max_steps,
            session_id = %metadata.session_id,
            task = %preview(&metadata.task, self.preview_chars),
            "run started"
        );
        Ok(())
    }

    async fn record_step(&self, record: &StepRecord) -> anyhow::Result<()> {
        let tools: Vec<&str> = record
            .tool_calls
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        let content = record
            .llm_response
            .as_ref()
            .map(|r| preview(&r.content, self.preview_chars))
            .unwrap_or_default();
        tracing::info!(
            event = "trajectory_step",
            step = record.step_number,
            state = %record.state,
            messages = record.messages.len(),
            tools = ?tools,
            content = %content,
            "step finished"
        );
        if let Some(results) = &record.tool_results {
            for result in results {
                tracing::debug!(
                    step = record.step_number,
                    tool = %result.name,
                    ok = result.success,
                    output = %preview(result.text(), self.preview_chars),
                    "tool result"
                );
            }
        }
        if let Some(error) = &record.error {
            tracing::warn!(step = record.step_number, error = %error, "step failed");
        }
        Ok(())
    }

    async fn end(&self, success: bool, final_result: Option<&str>) -> anyhow::Result<()> {
        tracing::info!(
            event = "trajectory_end",
            success,
            final_result = %preview(final_result.unwrap_or(""), self.preview_chars),
            "run finished"
        );
        Ok(())
    }
}

/// 可序列化的完整轨迹
#[derive(Clone, Debug, Default, Serialize)]
pub struct Trajectory {
    pub metadata: Option<RunMetadata>,
    pub steps: Vec<StepRecord>,
    pub success: Option<bool>,
    pub final_result: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 内存中的轨迹
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    inner: Mutex<Trajectory>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前轨迹的拷贝
    pub fn snapshot(&self) -> Trajectory {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn with<F: FnOnce(&mut Trajectory)>(&self, f: F) -> anyhow::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("trajectory lock poisoned: {}", e))?;
        f(&mut guard);
        Ok(())
    }
}

#[async_trait]
impl TrajectoryRecorder for InMemoryRecorder {
    async fn start(&self, metadata: &RunMetadata) -> anyhow::Result<()> {
        self.with(|t| {
            *t = Trajectory {
                metadata: Some(metadata.clone()),
                ..Default::default()
            };
        })
    }

    async fn record_step(&self, record: &StepRecord) -> anyhow::Result<()> {
        self.with(|t| t.steps.push(record.clone()))
    }

    async fn end(&self, success: bool, final_result: Option<&str>) -> anyhow::Result<()> {
        self.with(|t| {
            t.success = Some(success);
            t.final_result = final_result.map(String::from);
            t.finished_at = Some(Utc::now());
        })
    }
}
