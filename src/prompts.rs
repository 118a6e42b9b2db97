//! 提示词：系统提示、任务提示与运行环境摘要
//!
//! 系统提示优先读取 config/prompts/system.txt（或 ../config/prompts/system.txt），不存在时使用内置版本。

use std::path::Path;
use std::process::Command;

pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一名专业的数据分析智能体（BI-Agent），负责根据用户的分析需求，\
独立完成数据探查、清洗、分析、可视化与报告撰写。

# 工作方式
- 每一步先思考下一步要做什么，再调用合适的工具；根据工具返回的结果决定后续动作
- 同一步中可以调用多个工具，它们会按顺序依次执行
- 工具执行失败时，阅读错误信息并调整做法，不要重复同样的错误调用

# 可用工具
- bash：在持久 shell 会话中执行命令，用于浏览目录、查看文件
- python_executor：执行 Python 代码，可使用 pandas、numpy、matplotlib；代码中可直接使用 DATA_DIR 与 OUTPUT_DIR
- search_knowledge：在数据目录的说明文档中搜索关键词
- report_generator：生成 Markdown 格式的分析报告
- task_done：任务全部完成后调用，summary 参数中给出完成总结

# 报告要求
- 报告只能引用图片文件（.png/.jpg 等），不要引用 CSV、Excel 等数据文件，数据请直接以文字或表格展示
- 图片放在对应章节标题之下，不要集中放在报告末尾

# 约束
- 严禁修改或删除原始数据文件
- 所有输出文件保存到输出目录
- 任务完成时必须调用 task_done 工具";

/// 读取系统提示：优先使用配置目录下的文件
pub fn system_prompt() -> String {
    ["config/prompts/system.txt", "../config/prompts/system.txt"]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// 运行环境摘要：操作系统、架构、Python 版本（可获取时）
pub fn system_info(python_bin: &str) -> String {
    let mut lines = vec![format!("操作系统：{}", std::env::consts::OS)];
    if let Some(name) = os_pretty_name() {
        lines.push(format!("  发行版：{}", name));
    }
    lines.push(format!("架构：{}", std::env::consts::ARCH));
    match python_version(python_bin) {
        Some(version) => lines.push(format!("Python 版本：{}", version)),
        None => lines.push("Python 版本：未知（无法执行 Python）".to_string()),
    }
    lines.join("\n")
}

fn os_pretty_name() -> Option<String> {
    let content = std::fs::read_to_string("/etc/os-release").ok()?;
    content
        .lines()
        .find_map(|l| l.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim_matches('"').to_string())
}

fn python_version(python_bin: &str) -> Option<String> {
    let output = Command::new(python_bin).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    // 旧版本 Python 把版本号写到 stderr
    let text = if output.stdout.is_empty() { output.stderr } else { output.stdout };
    let text = String::from_utf8_lossy(&text).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// 任务提示：任务、环境、目录、推荐流程与目录约束，末尾追加额外参数
pub fn task_prompt(task: &str, system_info: &str, data_dir: &Path, output_dir: &Path, extra_args: &[(String, String)]) -> String {
    let data = data_dir.display();
    let output = output_dir.display();
    let mut prompt = format!(
        "数据分析任务：{task}

## 环境信息
{system_info}

## 工作目录
数据目录：{data}
输出目录：{output}

请按照以下步骤完成分析：
1. 首先使用 `bash` 工具执行 `ls {data}` 命令，扫描数据目录，了解有哪些数据文件
2. 读取说明文件（如果有），理解数据结构和业务含义
3. 使用 `python_executor` 工具编写 Python 代码读取数据文件，了解数据基本信息
   - 数据目录路径：{data}（在代码中使用 DATA_DIR 变量）
   - 输出目录路径：{output}（在代码中使用 OUTPUT_DIR 变量）
   - 可以使用 pandas 读取 Excel/CSV：`pd.read_excel(f'{{DATA_DIR}}/文件名.xlsx')` 或 `pd.read_csv(f'{{DATA_DIR}}/文件名.csv')`
4. 根据需求使用 `python_executor` 工具进行数据清洗（缺失值、重复值、异常值等）
5. 使用 `python_executor` 工具进行数据分析和可视化
   - 图表保存到输出目录：`plt.savefig(f'{{OUTPUT_DIR}}/图表名称.png')`
6. 使用 `report_generator` 工具生成分析报告
7. **任务完成时，必须调用 `task_done` 工具**，在 summary 参数中提供任务完成总结

**重要约束 - 必须在数据目录及其子目录下操作：**
- **数据目录**：{data}
- **输出目录**：{output}
- **严禁修改或删除原始数据文件**
- 使用 bash 工具时必须使用绝对路径，例如 `ls {data}`、`cat {data}/README.md`、`find {data} -name \"*.csv\"`
- 不要使用不带路径的 `ls`、`pwd`，也不要访问数据目录外的路径
"
    );
    for (key, value) in extra_args {
        prompt.push_str(&format!("\n{}: {}", key, value));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_task_prompt_contents() {
        let prompt = task_prompt(
            "统计各地区销量",
            "操作系统：linux",
            &PathBuf::from("/data"),
            &PathBuf::from("/out"),
            &[("language".to_string(), "zh".to_string())],
        );
        assert!(prompt.starts_with("数据分析任务：统计各地区销量"));
        assert!(prompt.contains("`ls /data`"));
        assert!(prompt.contains("输出目录：/out"));
        assert!(prompt.contains("f'{DATA_DIR}/文件名.csv'"));
        assert!(prompt.ends_with("\nlanguage: zh"));
    }

    #[test]
    fn test_system_info_mentions_arch() {
        let info = system_info("definitely-not-a-python-binary");
        assert!(info.contains(std::env::consts::ARCH));
        assert!(info.contains("Python 版本：未知"));
    }

    #[test]
    fn test_default_system_prompt_names_completion_tool() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("task_done"));
        assert!(!system_prompt().is_empty());
    }
}
