//! 无工具调用时的完成判定
//!
//! 完成工具是权威信号；关键词判定只是兜底，可替换或关闭。

use crate::config::AgentSection;

/// 根据响应正文判断任务是否已完成
pub trait CompletionPolicy: Send + Sync {
    fn is_complete(&self, content: &str) -> bool;
}

/// 正文包含任一关键词即视为完成（不区分大小写）
#[derive(Clone, Debug)]
pub struct KeywordCompletion {
    keywords: Vec<String>,
}

impl KeywordCompletion {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl CompletionPolicy for KeywordCompletion {
    fn is_complete(&self, content: &str) -> bool {
        if content.is_empty() {
            return false;
        }
        let lower = content.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// 从不完成：只认完成工具
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverComplete;

impl CompletionPolicy for NeverComplete {
    fn is_complete(&self, _content: &str) -> bool {
        false
    }
}

/// 按 [agent] 配置构造完成判定
pub fn policy_from_config(agent: &AgentSection) -> Box<dyn CompletionPolicy> {
    if agent.enable_keyword_completion {
        Box::new(KeywordCompletion::new(agent.completion_keywords.iter().cloned()))
    } else {
        Box::new(NeverComplete)
    }
}
