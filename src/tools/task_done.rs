//! 任务完成工具：调用即代表 Agent 认为任务已结束，summary 为最终结果

use async_trait::async_trait;

use crate::core::ToolError;
use crate::tools::registry::{Tool, ToolArguments, ToolOutput, ToolParameter};

pub const TASK_DONE_TOOL: &str = "task_done";

pub struct TaskDoneTool;

#[async_trait]
impl Tool for TaskDoneTool {
    fn name(&self) -> &str {
        TASK_DONE_TOOL
    }

    fn description(&self) -> &str {
        "标记任务完成\n\
         * 当你确定已经完成用户的所有要求时，调用此工具\n\
         * 调用此工具后，Agent 将停止执行并返回最终结果\n\
         * 请在 summary 参数中提供任务完成的总结：主要步骤、关键发现、输出文件的位置（如果有）\n\
         * 只有在真正完成任务时才调用此工具，不要过早调用"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "summary",
            "string",
            "任务完成总结，包括执行步骤、关键发现、输出文件位置等",
        )]
    }

    async fn execute(&self, args: &ToolArguments) -> Result<ToolOutput, ToolError> {
        let summary = args
            .get("summary")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if summary.is_empty() {
            return Ok(ToolOutput::err("必须提供任务完成总结（summary 参数）"));
        }
        Ok(ToolOutput::ok(format!("任务完成标记已设置。总结：{}", summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_summary_required() {
        let out = TaskDoneTool.execute(&ToolArguments::new()).await.unwrap();
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn test_summary_echoed() {
        let mut args = ToolArguments::new();
        args.insert("summary".into(), json!("pong"));
        let out = TaskDoneTool.execute(&args).await.unwrap();
        assert_eq!(out.output.as_deref(), Some("任务完成标记已设置。总结：pong"));
    }
}
