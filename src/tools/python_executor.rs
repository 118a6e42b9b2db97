//! Python 代码执行工具
//!
//! 通过外部解释器运行代码，前置脚本定义 DATA_DIR / OUTPUT_DIR 并尽力导入 pandas、numpy、matplotlib；
//! 工作目录为输出目录。拒绝包含危险关键字的代码，每次调用有独立超时。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::ToolError;
use crate::tools::registry::{Tool, ToolArguments, ToolOutput, ToolParameter};

const DANGEROUS_KEYWORDS: &[&str] = &[
    "__import__",
    "eval(",
    "exec(",
    "compile(",
    "input(",
    "raw_input(",
    "subprocess",
    "os.system",
    "os.popen",
    "shutil.rmtree",
    "shutil.move",
];

const PRELUDE: &str = r#"import os, sys, warnings
warnings.filterwarnings("ignore", category=UserWarning, module="matplotlib")
DATA_DIR = os.environ.get("BI_AGENT_DATA_DIR") or None
OUTPUT_DIR = os.environ.get("BI_AGENT_OUTPUT_DIR") or None
from pathlib import Path
try:
    import pandas as pd
    import numpy as np
except ImportError:
    pass
try:
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as plt
    plt.rcParams["font.sans-serif"] = ["Arial Unicode MS", "SimHei", "WenQuanYi Zen Hei", "Noto Sans CJK SC", "DejaVu Sans"]
    plt.rcParams["axes.unicode_minus"] = False
except ImportError:
    pass
try:
    import seaborn as sns
except ImportError:
    sns = None
"#;

pub struct PythonExecutorTool {
    python_bin: String,
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    timeout: Duration,
}

impl PythonExecutorTool {
    pub fn new(python_bin: impl Into<String>, data_dir: Option<PathBuf>, output_dir: Option<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            python_bin: python_bin.into(),
            data_dir,
            output_dir,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn find_dangerous(code: &str) -> Option<&'static str> {
        let lower = code.to_lowercase();
        DANGEROUS_KEYWORDS.iter().copied().find(|k| lower.contains(k))
    }
}

#[async_trait]
impl Tool for PythonExecutorTool {
    fn name(&self) -> &str {
        "python_executor"
    }

    fn description(&self) -> &str {
        "执行 Python 代码工具\n\
         * 用于执行 Python 代码完成数据分析任务：数据读取、清洗、可视化、统计分析\n\
         * 已尝试导入常用库：pandas (pd), numpy (np), matplotlib.pyplot (plt), seaborn (sns)\n\
         * 提供数据目录和输出目录的路径变量：DATA_DIR, OUTPUT_DIR\n\
         * 使用 print 输出需要返回的结果；图表请保存到 OUTPUT_DIR\n\
         * 当前工作目录为输出目录"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("code", "string", "要执行的 Python 代码（字符串）"),
            ToolParameter::optional("description", "string", "代码功能的简要描述（可选，用于日志记录）"),
        ]
    }

    async fn execute(&self, args: &ToolArguments) -> Result<ToolOutput, ToolError> {
        let code = args.get("code").and_then(|v| v.as_str()).unwrap_or("");
        if code.trim().is_empty() {
            return Ok(ToolOutput::err("必须提供要执行的 Python 代码"));
        }
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("执行 Python 代码");

        if let Some(keyword) = Self::find_dangerous(code) {
            return Ok(ToolOutput::err(format!(
                "代码包含潜在危险操作: {}。请使用安全的代码实现。",
                keyword
            )));
        }

        let script = format!("{}\n{}\n", PRELUDE, code);
        let mut cmd = Command::new(&self.python_bin);
        cmd.arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.data_dir {
            cmd.env("BI_AGENT_DATA_DIR", dir);
        }
        if let Some(dir) = &self.output_dir {
            cmd.env("BI_AGENT_OUTPUT_DIR", dir).current_dir(dir);
        }

        tracing::info!(description = %description, "python executor run");
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Ok(ToolOutput::err(format!(
                    "❌ {} 执行超时（{} 秒）",
                    description,
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(e)) => return Ok(ToolOutput::err(format!("准备执行环境时出错: {}", e))),
            Ok(Ok(o)) => o,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        if output.status.success() {
            let mut lines = vec![format!("✅ {} 执行成功", description)];
            if !stdout.is_empty() {
                lines.push(format!("\n标准输出:\n{}", stdout));
            }
            if !stderr.is_empty() {
                lines.push(format!("\n警告信息:\n{}", stderr));
            }
            return Ok(ToolOutput::ok(lines.join("\n")));
        }

        let mut error = format!("❌ {} 执行失败\n\n错误信息:\n{}", description, stderr);
        if !stdout.is_empty() {
            error.push_str(&format!("\n\n执行过程中的输出:\n{}", stdout));
        }
        Ok(ToolOutput {
            output: None,
            error: Some(error),
            error_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dangerous_keywords_detected() {
        assert_eq!(PythonExecutorTool::find_dangerous("import subprocess"), Some("subprocess"));
        assert_eq!(PythonExecutorTool::find_dangerous("EVAL(x)"), Some("eval("));
        assert_eq!(PythonExecutorTool::find_dangerous("print(open('a').read())"), None);
    }

    #[tokio::test]
    async fn test_rejects_empty_and_dangerous_code() {
        let tool = PythonExecutorTool::new("python3", None, None, 5);
        let mut args = ToolArguments::new();
        let out = tool.execute(&args).await.unwrap();
        assert!(!out.is_success());

        args.insert("code".into(), json!("os.system('ls')"));
        let out = tool.execute(&args).await.unwrap();
        assert!(out.error.unwrap_or_default().contains("os.system"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_a_failed_output() {
        let tool = PythonExecutorTool::new("definitely-not-a-python-binary", None, None, 5);
        let mut args = ToolArguments::new();
        args.insert("code".into(), json!("print(1)"));
        let out = tool.execute(&args).await.unwrap();
        assert!(!out.is_success());
        assert!(out.error.unwrap_or_default().starts_with("准备执行环境时出错"));
    }
}
