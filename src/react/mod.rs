//! 认知层：步骤循环、每步的记忆上下文拼接、完成判定

pub mod completion;
pub mod loop_;
pub mod memory;

pub use completion::{policy_from_config, CompletionPolicy, KeywordCompletion, NeverComplete};
pub use loop_::{AgentLoop, MAX_STEPS_EXCEEDED, NOT_FINISHED_PROMPT};
pub use memory::{splice, ContextWindow};
