use crate::traits::ToolSpec;
use std::fmt::Write;
use std::path::Path;
use tracing::debug;

const PERSONA_MAX_CHARS: usize = 20_000;

/// The system prompt and display metadata of one agent.
///
/// Built once per roster and shared read-only by every session.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub description: String,
    pub prompt: String,
    /// Describe tools in the prompt and ask for `<tool_call>` blocks, for
    /// models without native function calling.
    pub text_tool_protocol: bool,
}

impl Persona {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prompt: prompt.into(),
            text_tool_protocol: false,
        }
    }

    pub fn with_text_tool_protocol(mut self, enabled: bool) -> Self {
        self.text_tool_protocol = enabled;
        self
    }

    /// Replaces the prompt with `<workspace>/personas/<name>.md` when that
    /// file exists and is not blank.
    pub fn with_override_from(mut self, workspace: &Path) -> Self {
        let path = workspace.join("personas").join(format!("{}.md", self.name));
        let Ok(content) = std::fs::read_to_string(&path) else {
            return self;
        };
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return self;
        }

        debug!(persona = %self.name, path = %path.display(), "Loaded persona override");
        self.prompt = if trimmed.chars().count() > PERSONA_MAX_CHARS {
            let truncated: String = trimmed.chars().take(PERSONA_MAX_CHARS).collect();
            format!("{}\n\n[... truncated at {} chars]", truncated, PERSONA_MAX_CHARS)
        } else {
            trimmed.to_string()
        };
        self
    }

    pub fn system_prompt(&self, tools: &[ToolSpec]) -> String {
        let mut parts = vec![self.prompt.clone()];
        if self.text_tool_protocol && !tools.is_empty() {
            parts.push(tool_protocol(tools));
        }
        parts.push(runtime_context());
        parts.join("\n\n---\n\n")
    }
}

fn tool_protocol(tools: &[ToolSpec]) -> String {
    let mut out = String::from("## Tool Use Protocol\n\n");
    out.push_str("To use a tool, wrap a JSON object in <tool_call> tags:\n\n");
    out.push_str("```\n<tool_call>\n{\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}\n</tool_call>\n```\n\n");
    out.push_str("Output real <tool_call> tags, never a description of them. ");
    out.push_str("Transfer tools hand the conversation to another agent.\n\n");
    out.push_str("### Available Tools\n\n");
    for tool in tools {
        let _ = writeln!(
            out,
            "**{}**: {}\nParameters: `{}`\n",
            tool.name, tool.description, tool.parameters_schema
        );
    }
    out
}

fn runtime_context() -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
    format!("## Runtime Context\n\n### Current Time\n{}", now)
}
