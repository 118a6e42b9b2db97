pub mod bash;
pub mod executor;
pub mod python_executor;
pub mod registry;
pub mod report_generator;
pub mod search_knowledge;
pub mod task_done;

pub use bash::BashTool;
pub use executor::ToolExecutor;
pub use python_executor::PythonExecutorTool;
pub use registry::{
    input_schema, normalize_name, SchemaFlavor, Tool, ToolArguments, ToolCall, ToolDefinition, ToolOutput,
    ToolParameter, ToolRegistry, ToolResult,
};
pub use report_generator::ReportGeneratorTool;
pub use search_knowledge::SearchKnowledgeTool;
pub use task_done::{TaskDoneTool, TASK_DONE_TOOL};
