//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再叠加 --config 指定的文件，最后用环境变量 `BI_AGENT__*` 覆盖
//! （双下划线表示嵌套，如 `BI_AGENT__AGENT__MAX_STEPS=30`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub memory: MemoryConfig,
    pub tools: ToolsSection,
}

/// [app] 段：输出目录与用户标识
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppSection {
    /// 未指定 -o 时的输出目录
    pub output_dir: PathBuf,
    /// 长期记忆归属的用户
    pub user_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            user_id: "default_user".to_string(),
        }
    }
}

/// [llm] 段：提供方、模型与超时
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / doubao / qwen / deepseek
    pub provider: String,
    /// 为空或 "default" 时使用提供方默认模型
    pub model: String,
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// 使用 OpenAI 结构化工具调用的严格 schema
    pub strict_tool_schema: bool,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "default".to_string(),
            base_url: None,
            api_key: None,
            strict_tool_schema: false,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 120 }
    }
}

/// [agent] 段：步数上限、完成判定与记忆上下文窗口
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_steps: usize,
    /// 调用即视为任务完成的工具
    pub completion_tool: String,
    /// 无工具调用时用于判定完成的关键词
    pub completion_keywords: Vec<String>,
    pub enable_keyword_completion: bool,
    /// 回溯扫描的最近消息条数
    pub recent_scan_limit: usize,
    /// 实际注入的最近交互条数
    pub recent_keep: usize,
    pub preview_chars: usize,
    pub args_preview_chars: usize,
    /// 每步写入会话记忆的正文上限
    pub step_memory_chars: usize,
}

fn default_completion_keywords() -> Vec<String> {
    ["完成", "已完成", "任务完成", "分析完成", "报告已生成"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 50,
            completion_tool: "task_done".to_string(),
            completion_keywords: default_completion_keywords(),
            enable_keyword_completion: true,
            recent_scan_limit: 4,
            recent_keep: 2,
            preview_chars: 300,
            args_preview_chars: 200,
            step_memory_chars: 500,
        }
    }
}

/// 记忆后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    Mem0,
    Local,
    None,
}

/// [memory] 段：后端、压缩与检索参数
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub backend: MemoryBackend,
    /// Mem0 API Key；未设置时读取 MEM0_API_KEY
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub enable_compression: bool,
    /// 消息数超过该值时触发压缩
    pub compression_threshold: usize,
    /// 压缩掉的比例
    pub compression_ratio: f64,
    pub short_term_ttl_hours: Option<u64>,
    pub long_term_ttl_hours: Option<u64>,
    pub retrieval_limit: usize,
    /// 降级检索扫描的最近消息条数
    pub fallback_window: usize,
    pub local_max_entries: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::Mem0,
            api_key: None,
            base_url: None,
            request_timeout_secs: 30,
            enable_compression: true,
            compression_threshold: 10,
            compression_ratio: 0.5,
            short_term_ttl_hours: Some(24),
            long_term_ttl_hours: None,
            retrieval_limit: 5,
            fallback_window: 20,
            local_max_entries: 1000,
        }
    }
}

/// [tools] 段：各工具自带的超时
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolsSection {
    pub bash_timeout_secs: u64,
    pub python_timeout_secs: u64,
    pub python_bin: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            bash_timeout_secs: 120,
            python_timeout_secs: 300,
            python_bin: "python3".to_string(),
        }
    }
}

impl AppConfig {
    /// 检查取值范围；CLI 覆盖之后也需再次调用
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.agent.max_steps == 0 {
            return Err(AgentError::Config("agent.max_steps 必须大于 0".into()));
        }
        if self.agent.recent_keep > self.agent.recent_scan_limit {
            return Err(AgentError::Config(format!(
                "agent.recent_keep ({}) 不能大于 agent.recent_scan_limit ({})",
                self.agent.recent_keep, self.agent.recent_scan_limit
            )));
        }
        let ratio = self.memory.compression_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(AgentError::Config(format!(
                "memory.compression_ratio 必须在 [0, 1] 之间，当前为 {}",
                ratio
            )));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 BI_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BI_AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BI_AGENT")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("agent.completion_keywords")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_steps, 50);
        assert_eq!(cfg.agent.recent_scan_limit, 4);
        assert_eq!(cfg.agent.recent_keep, 2);
        assert_eq!(cfg.memory.compression_threshold, 10);
        assert_eq!(cfg.memory.short_term_ttl_hours, Some(24));
        assert!(cfg.agent.completion_keywords.contains(&"分析完成".to_string()));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[agent]\nmax_steps = 7\n\n[memory]\nbackend = \"local\"\n").unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_steps, 7);
        assert_eq!(cfg.agent.completion_tool, "task_done");
        assert_eq!(cfg.memory.backend, MemoryBackend::Local);
        assert_eq!(cfg.tools.python_bin, "python3");
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        assert!(AppConfig::default().validate().is_ok());

        let mut cfg = AppConfig::default();
        cfg.agent.max_steps = 0;
        assert!(matches!(cfg.validate(), Err(AgentError::Config(_))));

        let mut cfg = AppConfig::default();
        cfg.memory.compression_ratio = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().starts_with("配置错误: memory.compression_ratio"));

        let mut cfg = AppConfig::default();
        cfg.agent.recent_keep = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(load_config(Some(PathBuf::from("/nonexistent/bi-agent.toml"))).is_err());
    }
}
