pub mod provider;
pub mod tool;

pub use provider::{ChatMessage, ChatRequest, ChatResponse, Provider, ToolCall};
pub use tool::{DelegateTool, Tool, ToolKind, ToolSpec, Typed, TypedTool, decode_args, empty_schema};
