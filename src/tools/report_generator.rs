//! 报告生成工具：将 Markdown 报告写入输出路径
//!
//! 用户侧只能展示图片，因此内容中指向非图片文件（csv、xlsx、json 等）的本地链接会被替换为纯文本文件名；
//! http(s) 链接保留原样。

use std::path::Path;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::json;

use crate::core::ToolError;
use crate::tools::registry::{Tool, ToolArguments, ToolOutput, ToolParameter};

const FILE_LINK_PATTERN: &str =
    r"(?i)\[([^\]]+)\]\(([^)]+\.(?:csv|xlsx|xls|txt|json|pdf|doc|docx|zip|rar))\)";

pub struct ReportGeneratorTool {
    file_link: Option<Regex>,
}

impl Default for ReportGeneratorTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportGeneratorTool {
    pub fn new() -> Self {
        Self {
            file_link: Regex::new(FILE_LINK_PATTERN).ok(),
        }
    }

    /// 去掉非图片文件的本地链接
    fn filter_links(&self, content: &str) -> String {
        let Some(re) = &self.file_link else {
            return content.to_string();
        };
        re.replace_all(content, |caps: &Captures| {
            let text = &caps[1];
            let target = &caps[2];
            if target.starts_with("http://") || target.starts_with("https://") {
                return caps[0].to_string();
            }
            let file_name = Path::new(target)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(target);
            tracing::warn!(file = %file_name, link_text = %text, "non-image file link removed from report");
            if text == target || text == file_name {
                file_name.to_string()
            } else {
                format!("{}: {}", text, file_name)
            }
        })
        .into_owned()
    }

    pub fn render(&self, title: &str, content: &str) -> String {
        format!("# {}\n\n---\n\n{}\n", title, self.filter_links(content))
    }
}

#[async_trait]
impl Tool for ReportGeneratorTool {
    fn name(&self) -> &str {
        "report_generator"
    }

    fn description(&self) -> &str {
        "生成数据分析报告\n\
         * 支持 Markdown 格式，报告会保存到输出目录\n\
         * **重要约束**：\n\
         \x20 - 报告中只能包含图片文件（.png, .jpg, .jpeg, .gif, .bmp, .webp 等）\n\
         \x20 - 不要包含非图片文件的链接或引用（如 .csv, .xlsx, .txt, .json, .pdf 等），数据请直接以文本、表格或图表展示\n\
         \x20 - 图片应直接放在相应的章节标题下，不要集中放在报告末尾"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("output_path", "string", "报告保存的绝对路径"),
            ToolParameter::required("title", "string", "报告标题"),
            ToolParameter::required("content", "string", "报告内容（Markdown 格式）"),
            ToolParameter::optional("chart_paths", "array", "图表文件路径列表（可选）")
                .with_items(json!({"type": "string"})),
        ]
    }

    async fn execute(&self, args: &ToolArguments) -> Result<ToolOutput, ToolError> {
        let get = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string();
        let (output_path, title, content) = (get("output_path"), get("title"), get("content"));
        if output_path.is_empty() || title.is_empty() || content.is_empty() {
            return Ok(ToolOutput::err("必须提供输出路径、标题和内容"));
        }

        if let Some(charts) = args.get("chart_paths").and_then(|v| v.as_array()) {
            tracing::debug!(count = charts.len(), "chart paths are referenced from content, not appended");
        }

        let path = Path::new(&output_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolOutput::err(format!("生成报告时出错: {}", e)));
            }
        }
        if let Err(e) = tokio::fs::write(path, self.render(&title, &content)).await {
            return Ok(ToolOutput::err(format!("生成报告时出错: {}", e)));
        }
        tracing::info!(path = %output_path, "report written");
        Ok(ToolOutput::ok(format!("报告已成功生成并保存到: {}", output_path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_image_links_are_flattened() {
        let tool = ReportGeneratorTool::new();
        let content = "见 [明细](out/detail.csv) 与 [data.xlsx](data.xlsx)，图 ![趋势](trend.png)，[外部](https://x.com/a.csv)";
        let filtered = tool.filter_links(content);
        assert!(filtered.contains("明细: detail.csv"));
        assert!(filtered.contains("与 data.xlsx，"));
        assert!(filtered.contains("![趋势](trend.png)"));
        assert!(filtered.contains("[外部](https://x.com/a.csv)"));
    }

    #[tokio::test]
    async fn test_writes_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.md");
        let mut args = ToolArguments::new();
        args.insert("output_path".into(), json!(path.to_string_lossy()));
        args.insert("title".into(), json!("销售分析"));
        args.insert("content".into(), json!("## 结论\n增长 10%"));

        let out = ReportGeneratorTool::new().execute(&args).await.unwrap();
        assert!(out.is_success());
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "# 销售分析\n\n---\n\n## 结论\n增长 10%\n");
    }

    #[tokio::test]
    async fn test_missing_fields_fail() {
        let out = ReportGeneratorTool::new().execute(&ToolArguments::new()).await.unwrap();
        assert!(!out.is_success());
    }
}
