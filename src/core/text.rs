//! 文本截断（按字符而非字节，避免切断中文）

/// 超过 max_chars 个字符时截断并追加 "..."
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// 只截断不追加省略号
pub fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_short_text_unchanged() {
        assert_eq!(preview("数据分析", 10), "数据分析");
    }

    #[test]
    fn test_preview_counts_chars_not_bytes() {
        assert_eq!(preview("一二三四五", 3), "一二三...");
        assert_eq!(truncate("一二三四五", 3), "一二三");
    }

    #[test]
    fn test_preview_exact_length() {
        assert_eq!(preview("abc", 3), "abc");
    }
}
