use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Failures surfaced by the bus, the agent loops and the session layer.
///
/// Collaborators (providers, tools) report `anyhow::Error`; the loop wraps
/// those into the variant that decides how the failure is handled.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The completion call failed. Recovered inside the loop.
    #[error("model call failed: {0:#}")]
    ModelCall(anyhow::Error),

    /// The model asked for a tool neither registry knows.
    #[error("{agent}: unknown tool '{tool}'")]
    UnknownTool { agent: String, tool: String },

    /// A direct or delegate tool raised while executing.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// Wiring mistakes: duplicate subscriptions, unknown topics.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session limit reached ({0} active)")]
    SessionLimit(usize),

    /// A topic received a message kind it has no handler for.
    #[error("{topic} has no handler for {kind} messages")]
    Unroutable { topic: String, kind: &'static str },

    #[error("handler for {0} panicked")]
    HandlerPanicked(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("message bus is not running")]
    BusStopped,
}

impl AgentError {
    pub fn tool(tool: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: err.to_string(),
        }
    }

    /// Failures that end a loop invocation without a reply to the user.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ModelCall(_) | Self::Cancelled)
    }
}
