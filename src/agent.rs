//! BI-Agent 门面
//!
//! 组装默认工具（bash / python_executor / search_knowledge / report_generator / task_done）、
//! 记忆后端与步骤循环；run 负责清理会话记忆、构造初始对话、记录轨迹起止。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;

use crate::config::{AppConfig, MemoryBackend, MemoryConfig};
use crate::core::AgentExecution;
use crate::llm::LlmClient;
use crate::memory::{LocalMemoryStore, Mem0Store, MemoryManager, MemoryStore, Message};
use crate::prompts;
use crate::react::AgentLoop;
use crate::tools::{
    BashTool, PythonExecutorTool, ReportGeneratorTool, SchemaFlavor, SearchKnowledgeTool, TaskDoneTool, Tool,
    ToolExecutor,
};
use crate::trajectory::{RunMetadata, TracingRecorder, TrajectoryRecorder};

/// 单次运行的目录与身份
#[derive(Clone, Debug)]
pub struct AgentOptions {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub user_id: String,
    pub session_id: String,
    /// 运行前清空会话记忆
    pub clear_memory: bool,
}

pub struct Agent {
    inner: AgentLoop,
    recorder: Arc<dyn TrajectoryRecorder>,
    data_dir: PathBuf,
    output_dir: PathBuf,
    session_id: String,
    clear_memory: bool,
    python_bin: String,
}

impl Agent {
    /// 使用默认工具集
    pub fn new(config: &AppConfig, llm: Arc<dyn LlmClient>, options: AgentOptions) -> anyhow::Result<Self> {
        let (data_dir, output_dir) = prepare_dirs(&options.data_dir, &options.output_dir)?;
        let tools = default_tools(config, &data_dir, &output_dir);
        Self::build(config, llm, options, data_dir, output_dir, tools)
    }

    /// 使用自定义工具集
    pub fn with_tools(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        options: AgentOptions,
        tools: Vec<Arc<dyn Tool>>,
    ) -> anyhow::Result<Self> {
        let (data_dir, output_dir) = prepare_dirs(&options.data_dir, &options.output_dir)?;
        Self::build(config, llm, options, data_dir, output_dir, tools)
    }

    fn build(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        options: AgentOptions,
        data_dir: PathBuf,
        output_dir: PathBuf,
        tools: Vec<Arc<dyn Tool>>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let store = create_memory_store(&config.memory);
        let memory = MemoryManager::new(config.memory.clone(), &options.user_id, &options.session_id, store);
        let recorder: Arc<dyn TrajectoryRecorder> = Arc::new(TracingRecorder::new(config.agent.preview_chars));
        let flavor = if config.llm.strict_tool_schema {
            SchemaFlavor::Strict
        } else {
            SchemaFlavor::Standard
        };
        let inner = AgentLoop::new(llm, Arc::new(ToolExecutor::from_tools(tools)), memory, &config.agent)
            .with_schema_flavor(flavor)
            .with_recorder(recorder.clone());
        Ok(Self {
            inner,
            recorder,
            data_dir,
            output_dir,
            session_id: options.session_id,
            clear_memory: options.clear_memory,
            python_bin: config.tools.python_bin.clone(),
        })
    }

    /// 替换轨迹记录器（默认输出 tracing 事件）
    pub fn with_recorder(mut self, recorder: Arc<dyn TrajectoryRecorder>) -> Self {
        self.inner = self.inner.with_recorder(recorder.clone());
        self.recorder = recorder;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn memory(&self) -> &MemoryManager {
        self.inner.memory()
    }

    /// 运行一次分析任务；总是返回 AgentExecution
    pub async fn run(&mut self, task: &str, extra_args: &[(String, String)]) -> AgentExecution {
        if self.clear_memory {
            self.inner.memory_mut().clear_session_memory().await;
            tracing::info!(session_id = %self.session_id, "session memory cleared");
        }

        let metadata = RunMetadata {
            task: task.to_string(),
            provider: self.inner.llm().provider().to_string(),
            model: self.inner.llm().model().to_string(),
            max_steps: self.inner.max_steps(),
            data_dir: Some(self.data_dir.clone()),
            output_dir: Some(self.output_dir.clone()),
            session_id: self.session_id.clone(),
            started_at: Utc::now(),
        };
        if let Err(e) = self.recorder.start(&metadata).await {
            tracing::warn!(error = %e, "trajectory start failed");
        }

        let info = prompts::system_info(&self.python_bin);
        let initial = vec![
            Message::system(prompts::system_prompt()),
            Message::user(prompts::task_prompt(task, &info, &self.data_dir, &self.output_dir, extra_args)),
        ];
        self.inner.new_task(task, initial);
        let execution = self.inner.execute_task().await;

        if let Err(e) = self
            .recorder
            .end(execution.success, execution.final_result.as_deref())
            .await
        {
            tracing::warn!(error = %e, "trajectory end failed");
        }

        let usage = execution.total_usage();
        tracing::info!(
            success = execution.success,
            steps = execution.steps.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            elapsed_secs = execution.execution_time,
            memory_degraded = self.inner.memory().is_degraded(),
            "analysis finished"
        );
        execution
    }
}

/// 创建目录并解析为绝对路径
fn prepare_dirs(data_dir: &Path, output_dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let mut resolved = Vec::with_capacity(2);
    for dir in [data_dir, output_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("无法创建目录 {}", dir.display()))?;
        resolved.push(
            dir.canonicalize()
                .with_context(|| format!("无法解析目录 {}", dir.display()))?,
        );
    }
    let output = resolved.pop().unwrap_or_default();
    let data = resolved.pop().unwrap_or_default();
    Ok((data, output))
}

/// 默认工具集
pub fn default_tools(config: &AppConfig, data_dir: &Path, output_dir: &Path) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(BashTool::new(Some(data_dir.to_path_buf()), config.tools.bash_timeout_secs)),
        Arc::new(PythonExecutorTool::new(
            config.tools.python_bin.clone(),
            Some(data_dir.to_path_buf()),
            Some(output_dir.to_path_buf()),
            config.tools.python_timeout_secs,
        )),
        Arc::new(SearchKnowledgeTool::new(data_dir)),
        Arc::new(ReportGeneratorTool::new()),
        Arc::new(TaskDoneTool),
    ]
}

/// 按 [memory].backend 创建外部记忆存储；mem0 缺少 API Key 时返回 None（记忆管理器随即进入本地模式）
pub fn create_memory_store(config: &MemoryConfig) -> Option<Arc<dyn MemoryStore>> {
    match config.backend {
        MemoryBackend::None => None,
        MemoryBackend::Local => Some(Arc::new(LocalMemoryStore::new(config.local_max_entries))),
        MemoryBackend::Mem0 => {
            let key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| std::env::var("MEM0_API_KEY").ok().filter(|k| !k.is_empty()));
            match key {
                Some(key) => Some(Arc::new(Mem0Store::new(
                    key,
                    config.base_url.as_deref(),
                    config.request_timeout_secs,
                ))),
                None => {
                    tracing::warn!(event = "memory_degraded", reason = "missing_api_key", "MEM0_API_KEY not set");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_dirs_creates_and_resolves() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        let out = tmp.path().join("nested/out");
        let (d, o) = prepare_dirs(&data, &out).unwrap();
        assert!(d.is_absolute() && d.is_dir());
        assert!(o.is_absolute() && o.is_dir());
        assert!(o.ends_with("nested/out"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.agent.max_steps = 0;
        let options = AgentOptions {
            data_dir: tmp.path().join("data"),
            output_dir: tmp.path().join("out"),
            user_id: "u".into(),
            session_id: "s".into(),
            clear_memory: false,
        };
        let llm = Arc::new(crate::llm::ScriptedLlmClient::from_responses(vec![]));
        let err = Agent::with_tools(&config, llm, options, vec![]).err().unwrap();
        assert!(err.to_string().contains("max_steps"));
    }

    #[test]
    fn test_default_tool_names() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = default_tools(&AppConfig::default(), tmp.path(), tmp.path());
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            ["bash", "python_executor", "search_knowledge", "report_generator", "task_done"]
        );
    }

    #[test]
    fn test_memory_backend_selection() {
        let local = MemoryConfig {
            backend: MemoryBackend::Local,
            ..Default::default()
        };
        assert_eq!(create_memory_store(&local).map(|s| s.name().to_string()).as_deref(), Some("local"));
        let none = MemoryConfig {
            backend: MemoryBackend::None,
            ..Default::default()
        };
        assert!(create_memory_store(&none).is_none());
        let mem0 = MemoryConfig {
            backend: MemoryBackend::Mem0,
            api_key: Some("k".into()),
            ..Default::default()
        };
        assert_eq!(create_memory_store(&mem0).map(|s| s.name().to_string()).as_deref(), Some("mem0"));
    }
}
