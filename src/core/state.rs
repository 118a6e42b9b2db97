//! 执行状态：AgentExecution（一次任务）与 AgentStep（一次 思考→行动→观察）
//!
//! AgentExecution 由循环在 run 开始时创建、每步原地更新，结束时整体交还调用方；
//! AgentStep 在每轮开头创建，结束时（无论成功或出错）恰好追加一次，之后不再修改。

use serde::Serialize;

use crate::llm::{LlmResponse, LlmUsage};
use crate::tools::{ToolCall, ToolResult};

/// 任务执行状态：Idle → Running → {Completed | Error}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Completed,
    Error,
}

/// 单步状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStepState {
    Thinking,
    CallingTool,
    Reflecting,
    Error,
}

impl AgentStepState {
    /// 轨迹记录中使用的状态标签
    pub fn label(&self) -> &'static str {
        match self {
            AgentStepState::Thinking => "THINKING",
            AgentStepState::CallingTool => "CALLING_TOOL",
            AgentStepState::Reflecting => "REFLECTING",
            AgentStepState::Error => "ERROR",
        }
    }
}

/// 单个步骤；tool_results 若存在，与 tool_calls 数量、顺序一致
#[derive(Clone, Debug, Serialize)]
pub struct AgentStep {
    /// 从 1 开始，严格递增且不复用
    pub step_number: usize,
    pub state: AgentStepState,
    pub thought: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_results: Option<Vec<ToolResult>>,
    pub llm_response: Option<LlmResponse>,
    pub reflection: Option<String>,
    pub error: Option<String>,
    pub llm_usage: Option<LlmUsage>,
}

impl AgentStep {
    pub fn new(step_number: usize) -> Self {
        Self {
            step_number,
            state: AgentStepState::Thinking,
            thought: None,
            tool_calls: None,
            tool_results: None,
            llm_response: None,
            reflection: None,
            error: None,
            llm_usage: None,
        }
    }

    /// LLM 响应的正文（若有）
    pub fn response_content(&self) -> Option<&str> {
        self.llm_response
            .as_ref()
            .map(|r| r.content.as_str())
            .filter(|c| !c.is_empty())
    }
}

/// 一次完整的任务执行
///
/// Completed 意味着 success 为 true 且 final_result 非空；Error 意味着 success 为 false。
#[derive(Clone, Debug, Serialize)]
pub struct AgentExecution {
    pub task: String,
    pub steps: Vec<AgentStep>,
    pub state: AgentState,
    pub success: bool,
    pub final_result: Option<String>,
    /// 墙钟耗时（秒）
    pub execution_time: f64,
}

impl AgentExecution {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            steps: Vec::new(),
            state: AgentState::Idle,
            success: false,
            final_result: None,
            execution_time: 0.0,
        }
    }

    /// 标记任务完成
    pub fn complete(&mut self, final_result: impl Into<String>) {
        self.state = AgentState::Completed;
        self.success = true;
        self.final_result = Some(final_result.into());
    }

    /// 标记任务失败；已有的 final_result 不会被覆盖
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = AgentState::Error;
        self.success = false;
        if self.final_result.is_none() {
            self.final_result = Some(reason.into());
        }
    }

    /// 所有步骤的 token 用量之和
    pub fn total_usage(&self) -> LlmUsage {
        self.steps
            .iter()
            .filter_map(|s| s.llm_usage.clone())
            .fold(LlmUsage::default(), |acc, u| acc + u)
    }

    /// 最后一步记录的错误（步骤以错误结束时才有）
    pub fn last_error(&self) -> Option<&str> {
        self.steps.last().and_then(|s| s.error.as_deref())
    }
}
