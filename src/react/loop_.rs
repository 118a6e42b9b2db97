//! 步骤循环（思考 → 行动 → 观察）
//!
//! 每一步：拼接记忆上下文 → 调用 LLM → 顺序执行工具 → 判定完成 → 记录步骤。
//! - 完成信号：调用完成工具（权威），或无工具调用时响应命中完成关键词（兜底）
//! - 步数超过 max_steps 仍未完成：以 Error 结束，不抛错
//! - 单步内的任何错误：该步与整次执行标记为 Error 后退出循环，不重试
//! - 无论如何结束，都会关闭全部工具

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::{json, Value};

use crate::config::AgentSection;
use crate::core::{panic_message, truncate, AgentError, AgentExecution, AgentState, AgentStep, AgentStepState};
use crate::llm::LlmClient;
use crate::memory::{MemoryClass, MemoryManager, Message};
use crate::react::completion::{policy_from_config, CompletionPolicy};
use crate::react::memory::ContextWindow;
use crate::tools::{normalize_name, SchemaFlavor, ToolCall, ToolDefinition, ToolExecutor, ToolResult};
use crate::trajectory::{StepRecord, TrajectoryRecorder};

/// 步数耗尽时的最终结果
pub const MAX_STEPS_EXCEEDED: &str = "任务执行超过最大步数，未完成。";
/// 模型给出空的工具调用列表时追加的提示
pub const NOT_FINISHED_PROMPT: &str = "看起来你还没有完成任务。";
/// 完成工具没有给出总结时的最终结果
const DEFAULT_COMPLETION: &str = "任务已完成";

pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    memory: MemoryManager,
    policy: Box<dyn CompletionPolicy>,
    recorder: Option<Arc<dyn TrajectoryRecorder>>,
    window: ContextWindow,
    max_steps: usize,
    completion_tool: String,
    step_memory_chars: usize,
    schema_flavor: SchemaFlavor,
    task: Option<String>,
    initial_messages: Vec<Message>,
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn LlmClient>, executor: Arc<ToolExecutor>, memory: MemoryManager, agent: &AgentSection) -> Self {
        Self {
            llm,
            executor,
            memory,
            policy: policy_from_config(agent),
            recorder: None,
            window: ContextWindow::from_config(agent),
            max_steps: agent.max_steps,
            completion_tool: agent.completion_tool.clone(),
            step_memory_chars: agent.step_memory_chars,
            schema_flavor: SchemaFlavor::Standard,
            task: None,
            initial_messages: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn CompletionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn TrajectoryRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_schema_flavor(mut self, flavor: SchemaFlavor) -> Self {
        self.schema_flavor = flavor;
        self
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryManager {
        &mut self.memory
    }

    /// 设置任务与初始对话（通常为 system 提示 + 任务提示）
    pub fn new_task(&mut self, task: impl Into<String>, initial_messages: Vec<Message>) {
        self.task = Some(task.into());
        self.initial_messages = initial_messages;
    }

    /// 执行当前任务；总是返回 AgentExecution，不会返回错误
    pub async fn execute_task(&mut self) -> AgentExecution {
        let started = Instant::now();
        let mut execution = AgentExecution::new(self.task.clone().unwrap_or_default());

        let outcome = AssertUnwindSafe(self.run_steps(&mut execution)).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };
        if let Some(reason) = failure {
            tracing::error!(error = %reason, "agent loop aborted");
            execution.state = AgentState::Error;
            execution.success = false;
            execution.final_result = Some(format!("Agent 执行失败: {}", reason));
        }

        self.executor.close_all().await;
        execution.execution_time = started.elapsed().as_secs_f64();
        tracing::info!(
            success = execution.success,
            steps = execution.steps.len(),
            elapsed_secs = execution.execution_time,
            "task finished"
        );
        execution
    }

    async fn run_steps(&mut self, execution: &mut AgentExecution) -> Result<(), AgentError> {
        let task = self.task.clone().ok_or(AgentError::NoTask)?;
        let tools = self.executor.definitions(self.schema_flavor);
        let mut history = self.initial_messages.clone();
        execution.state = AgentState::Running;

        let mut step_number = 1;
        while step_number <= self.max_steps {
            tracing::debug!(step = step_number, max_steps = self.max_steps, "step started");
            let mut step = AgentStep::new(step_number);
            let mut outgoing = history.clone();

            match self
                .run_step(&task, &mut step, &mut history, &mut outgoing, &tools, execution)
                .await
            {
                Ok(()) => {
                    self.finalize_step(step, &outgoing, execution).await;
                    if execution.state == AgentState::Completed {
                        break;
                    }
                    step_number += 1;
                }
                Err(e) => {
                    tracing::warn!(step = step_number, error = %e, "step failed");
                    step.state = AgentStepState::Error;
                    step.error = Some(e.to_string());
                    execution.fail(e.to_string());
                    self.finalize_step(step, &outgoing, execution).await;
                    break;
                }
            }
        }

        if step_number > self.max_steps && !execution.success {
            execution.state = AgentState::Error;
            execution.final_result = Some(MAX_STEPS_EXCEEDED.to_string());
        }
        Ok(())
    }

    async fn run_step(
        &mut self,
        task: &str,
        step: &mut AgentStep,
        history: &mut Vec<Message>,
        outgoing: &mut Vec<Message>,
        tools: &[ToolDefinition],
        execution: &mut AgentExecution,
    ) -> Result<(), AgentError> {
        step.state = AgentStepState::Thinking;

        let relevant = self.memory.get_relevant_memories(task).await;
        *outgoing = self.window.assemble(history, relevant);

        let response = self.llm.chat(outgoing, tools).await?;
        step.llm_usage = response.usage.clone();
        step.llm_response = Some(response.clone());

        let Some(calls) = response.tool_calls else {
            self.push(history, Message::assistant(response.content.clone())).await;
            if self.policy.is_complete(&response.content) {
                execution.complete(response.content.clone());
                let record = format!("任务完成: {}\n结果: {}", task, response.content);
                self.memory
                    .add_memory(&record, MemoryClass::User, completion_metadata(task))
                    .await;
            }
            return Ok(());
        };

        self.push(history, Message::assistant_with_tools(response.content.clone(), calls.clone()))
            .await;
        step.state = AgentStepState::CallingTool;
        if calls.is_empty() {
            self.push(history, Message::user(NOT_FINISHED_PROMPT)).await;
            return Ok(());
        }

        step.tool_calls = Some(calls.clone());
        let results = self.executor.execute_sequential(&calls).await;
        check_pairing(&calls, &results)?;
        step.tool_results = Some(results.clone());

        let mut summary: Option<String> = None;
        for (call, result) in calls.iter().zip(results) {
            self.push(history, Message::tool_result(result.clone())).await;
            if !result.success {
                continue;
            }
            let mut metadata = HashMap::new();
            metadata.insert("tool_name".to_string(), json!(result.name));
            metadata.insert("step_number".to_string(), json!(step.step_number));
            let record = format!("工具 {} 执行结果: {}", result.name, result.text());
            self.memory.add_memory(&record, MemoryClass::Session, metadata).await;

            if normalize_name(&call.name) == normalize_name(&self.completion_tool) {
                summary = Some(
                    call.str_arg("summary")
                        .map(String::from)
                        .unwrap_or_else(|| result.text().to_string()),
                );
            }
        }

        if let Some(summary) = summary {
            let summary = if summary.is_empty() { DEFAULT_COMPLETION.to_string() } else { summary };
            let record = format!("任务完成: {}\n总结: {}", task, summary);
            execution.complete(summary);
            self.memory
                .add_memory(&record, MemoryClass::User, completion_metadata(task))
                .await;
        }
        Ok(())
    }

    /// 追加到历史并同步到记忆管理器
    async fn push(&mut self, history: &mut Vec<Message>, message: Message) {
        history.push(message.clone());
        self.memory.add_message(message).await;
    }

    /// 步骤只追加一次；随后通知轨迹记录器并写入会话记忆
    async fn finalize_step(&mut self, step: AgentStep, outgoing: &[Message], execution: &mut AgentExecution) {
        execution.steps.push(step);
        let Some(step) = execution.steps.last() else {
            return;
        };

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record_step(&StepRecord::from_step(step, outgoing)).await {
                tracing::warn!(step = step.step_number, error = %e, "trajectory record failed");
            }
        }

        if let Some(content) = step.response_content() {
            let mut metadata = HashMap::new();
            metadata.insert("step_number".to_string(), json!(step.step_number));
            metadata.insert("state".to_string(), json!(step.state.label()));
            let record = format!("步骤 {}: {}", step.step_number, truncate(content, self.step_memory_chars));
            self.memory.add_memory(&record, MemoryClass::Session, metadata).await;
        }
    }
}

/// 结果数量、顺序必须与调用一致
fn check_pairing(calls: &[ToolCall], results: &[ToolResult]) -> Result<(), AgentError> {
    if calls.len() != results.len() {
        return Err(AgentError::Internal(format!(
            "工具调用 {} 个，结果 {} 个",
            calls.len(),
            results.len()
        )));
    }
    match calls.iter().zip(results).find(|(c, r)| c.call_id != r.call_id) {
        Some((c, r)) => Err(AgentError::Internal(format!(
            "工具结果顺序错乱: 期望 {}，实际 {}",
            c.call_id, r.call_id
        ))),
        None => Ok(()),
    }
}

fn completion_metadata(task: &str) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    metadata.insert("task".to_string(), json!(task));
    metadata.insert("status".to_string(), json!("completed"));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::llm::{LlmError, LlmResponse, ScriptedLlmClient};
    use crate::tools::{TaskDoneTool, ToolArguments, TASK_DONE_TOOL};
    use crate::trajectory::InMemoryRecorder;

    fn done(summary: &str) -> LlmResponse {
        let mut args = ToolArguments::new();
        args.insert("summary".into(), json!(summary));
        LlmResponse::with_tool_calls("", vec![ToolCall::new(TASK_DONE_TOOL, "call-done", args)])
    }

    fn agent_loop(llm: ScriptedLlmClient, agent: AgentSection) -> AgentLoop {
        let executor = Arc::new(ToolExecutor::from_tools(vec![Arc::new(TaskDoneTool)]));
        let memory = MemoryManager::new(MemoryConfig::default(), "u", "s", None);
        AgentLoop::new(Arc::new(llm), executor, memory, &agent)
    }

    #[tokio::test]
    async fn test_execute_without_task_fails_softly() {
        let mut lp = agent_loop(ScriptedLlmClient::repeating(done("x")), AgentSection::default());
        let exec = lp.execute_task().await;
        assert_eq!(exec.state, AgentState::Error);
        assert!(exec.final_result.unwrap().starts_with("Agent 执行失败"));
        assert!(exec.steps.is_empty());
    }

    #[tokio::test]
    async fn test_completion_tool_finishes_in_one_step() {
        let mut lp = agent_loop(ScriptedLlmClient::from_responses(vec![done("pong")]), AgentSection::default());
        lp.new_task("ping", vec![Message::system("sys"), Message::user("ping")]);
        let exec = lp.execute_task().await;
        assert_eq!(exec.state, AgentState::Completed);
        assert_eq!(exec.final_result.as_deref(), Some("pong"));
        assert_eq!(exec.steps.len(), 1);
        assert_eq!(exec.steps[0].state, AgentStepState::CallingTool);
        assert_eq!(exec.steps[0].tool_results.as_ref().map(|r| r.len()), Some(1));
    }

    #[tokio::test]
    async fn test_failed_completion_tool_does_not_finish() {
        let agent = AgentSection {
            max_steps: 2,
            ..Default::default()
        };
        let mut lp = agent_loop(ScriptedLlmClient::repeating(done("")), agent);
        lp.new_task("t", vec![Message::user("t")]);
        let exec = lp.execute_task().await;
        assert_eq!(exec.state, AgentState::Error);
        assert_eq!(exec.steps.len(), 2);
        assert_eq!(exec.final_result.as_deref(), Some(MAX_STEPS_EXCEEDED));
    }

    #[tokio::test]
    async fn test_empty_tool_call_list_gets_nudge() {
        let llm = Arc::new(
            ScriptedLlmClient::from_responses(vec![LlmResponse::with_tool_calls("", vec![])]).then_repeat(done("ok")),
        );
        let executor = Arc::new(ToolExecutor::from_tools(vec![Arc::new(TaskDoneTool)]));
        let memory = MemoryManager::new(MemoryConfig::default(), "u", "s", None);
        let mut lp = AgentLoop::new(llm.clone(), executor, memory, &AgentSection::default());
        lp.new_task("t", vec![Message::user("t")]);
        let exec = lp.execute_task().await;
        assert!(exec.success);
        assert_eq!(exec.steps.len(), 2);
        let second = &llm.conversations()[1];
        assert!(second.iter().any(|m| m.text() == NOT_FINISHED_PROMPT));
    }

    #[tokio::test]
    async fn test_llm_error_ends_run_with_error_step() {
        let llm = ScriptedLlmClient::new(vec![Err(LlmError::Auth("bad key".into()))]);
        let recorder = Arc::new(InMemoryRecorder::new());
        let mut lp = agent_loop(llm, AgentSection::default()).with_recorder(recorder.clone());
        lp.new_task("t", vec![Message::user("t")]);
        let exec = lp.execute_task().await;
        assert_eq!(exec.state, AgentState::Error);
        assert_eq!(exec.steps.len(), 1);
        assert_eq!(exec.steps[0].state, AgentStepState::Error);
        let final_result = exec.final_result.unwrap();
        assert!(final_result.starts_with("LLM 调用失败"));
        assert!(final_result.contains("bad key"));
        let trajectory = recorder.snapshot();
        assert_eq!(trajectory.steps.len(), 1);
        assert_eq!(trajectory.steps[0].state, "ERROR");
    }

    #[test]
    fn test_check_pairing() {
        let a = ToolCall::new("x", "1", ToolArguments::new());
        let b = ToolCall::new("x", "2", ToolArguments::new());
        let ok = vec![ToolResult::success(&a, ""), ToolResult::success(&b, "")];
        assert!(check_pairing(&[a.clone(), b.clone()], &ok).is_ok());
        let swapped = vec![ToolResult::success(&b, ""), ToolResult::success(&a, "")];
        assert!(check_pairing(&[a.clone(), b], &swapped).is_err());
        assert!(check_pairing(&[a], &[]).is_err());
    }
}
