//! 知识库搜索：在数据目录中查找包含关键词的说明文件（.txt / .md 或自定义 glob），
//! 最多展示 5 个文件，每个文件最多 10 行匹配内容。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::core::ToolError;
use crate::tools::registry::{Tool, ToolArguments, ToolOutput, ToolParameter};

const MAX_FILES: usize = 5;
const MAX_LINES: usize = 10;
const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

pub struct SearchKnowledgeTool {
    data_dir: PathBuf,
}

impl SearchKnowledgeTool {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// 解析 file_pattern（逗号分隔）；为空时只看 .txt / .md
    fn patterns(file_pattern: Option<&str>) -> Vec<glob::Pattern> {
        file_pattern
            .map(|p| {
                p.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .filter_map(|s| glob::Pattern::new(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_candidate(path: &Path, patterns: &[glob::Pattern]) -> bool {
        if patterns.is_empty() {
            return matches!(
                path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref(),
                Some("txt") | Some("md")
            );
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        patterns.iter().any(|p| p.matches(name))
    }

    fn read_text(path: &Path) -> Option<String> {
        std::fs::read(path)
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
    }

    fn search(&self, query: &str, file_pattern: Option<&str>) -> Vec<(PathBuf, Vec<String>)> {
        let patterns = Self::patterns(file_pattern);
        let query_lower = query.to_lowercase();
        let mut hits = Vec::new();

        for entry in WalkDir::new(&self.data_dir)
            .max_depth(10)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || !Self::is_candidate(entry.path(), &patterns) {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
                continue;
            }
            let Some(content) = Self::read_text(entry.path()) else {
                continue;
            };
            if !content.to_lowercase().contains(&query_lower) {
                continue;
            }
            let lines = content
                .lines()
                .filter(|l| l.to_lowercase().contains(&query_lower))
                .map(|l| l.trim().to_string())
                .take(MAX_LINES)
                .collect();
            hits.push((entry.path().to_path_buf(), lines));
        }
        hits
    }
}

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        "search_knowledge"
    }

    fn description(&self) -> &str {
        "搜索知识库和模式信息\n\
         * 在数据目录中搜索说明文件（.txt、.md 格式）\n\
         * 提取字段含义、业务背景、数据来源等信息\n\
         * 帮助理解数据结构和业务含义"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("query", "string", "搜索查询（字段名、关键词等）"),
            ToolParameter::optional("file_pattern", "string", "文件模式（可选，例如：*.txt、*.md、README*）"),
        ]
    }

    async fn execute(&self, args: &ToolArguments) -> Result<ToolOutput, ToolError> {
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("").trim();
        if query.is_empty() {
            return Ok(ToolOutput::err("未提供搜索查询"));
        }
        if !self.data_dir.is_dir() {
            return Ok(ToolOutput::err(format!(
                "搜索知识库时出错: 数据目录不存在 {}",
                self.data_dir.display()
            )));
        }
        let file_pattern = args.get("file_pattern").and_then(|v| v.as_str());
        let hits = self.search(query, file_pattern);

        if hits.is_empty() {
            return Ok(ToolOutput::ok(format!(
                "未找到包含 '{}' 的说明文件。\n建议：检查数据目录中是否有 README.txt、字段说明.md 等文件。",
                query
            )));
        }

        let mut lines = vec![format!("找到 {} 个相关文件：\n", hits.len())];
        for (path, matched) in hits.iter().take(MAX_FILES) {
            lines.push(format!("\n文件: {}", path.display()));
            if matched.is_empty() {
                lines.push("  (文件包含关键词但未找到具体匹配行)".to_string());
            } else {
                lines.push("相关内容:".to_string());
                lines.extend(matched.iter().map(|l| format!("  {}", l)));
            }
        }
        if hits.len() > MAX_FILES {
            lines.push(format!("\n... 还有 {} 个文件未显示", hits.len() - MAX_FILES));
        }
        Ok(ToolOutput::ok(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(q: &str) -> ToolArguments {
        let mut args = ToolArguments::new();
        args.insert("query".into(), json!(q));
        args
    }

    #[tokio::test]
    async fn test_finds_matching_lines_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# 数据说明\nOrder_ID: 订单编号\n其他内容\n").unwrap();
        std::fs::write(dir.path().join("data.csv"), "order_id,amount\n").unwrap();

        let tool = SearchKnowledgeTool::new(dir.path());
        let out = tool.execute(&query("order_id")).await.unwrap();
        let text = out.output.unwrap();
        assert!(text.starts_with("找到 1 个相关文件"));
        assert!(text.contains("Order_ID: 订单编号"));
        assert!(!text.contains("data.csv"));
    }

    #[tokio::test]
    async fn test_caps_files_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..7 {
            let body: String = (0..15).map(|n| format!("key line {}\n", n)).collect();
            std::fs::write(dir.path().join(format!("f{}.txt", i)), body).unwrap();
        }
        let tool = SearchKnowledgeTool::new(dir.path());
        let text = tool.execute(&query("key")).await.unwrap().output.unwrap();
        assert_eq!(text.matches("\n文件: ").count(), MAX_FILES);
        assert!(text.contains("... 还有 2 个文件未显示"));
        assert!(text.contains("key line 9"));
        assert!(!text.contains("key line 10"));
    }

    #[tokio::test]
    async fn test_no_match_is_success_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SearchKnowledgeTool::new(dir.path());
        let out = tool.execute(&query("nothing")).await.unwrap();
        assert!(out.is_success());
        assert!(out.output.unwrap().starts_with("未找到包含 'nothing'"));
    }
}
