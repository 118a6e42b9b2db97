//! 核心类型：错误分类、执行/步骤状态、文本截断

pub mod error;
pub mod state;
pub mod text;

pub use error::{panic_message, AgentError, ToolError};
pub use state::{AgentExecution, AgentState, AgentStep, AgentStepState};
pub use text::{preview, truncate};
