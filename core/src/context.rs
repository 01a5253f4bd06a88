use crate::traits::{ChatMessage, ToolCall};
use serde::{Deserialize, Serialize};

pub const USER_SOURCE: &str = "User";

/// Result of executing one tool call, paired with the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::ok(call, content)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    User { source: String, content: String },
    Assistant { source: String, content: String },
    ToolCalls { source: String, calls: Vec<ToolCall> },
    ToolResults { results: Vec<ToolOutcome> },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            source: USER_SOURCE.to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Assistant {
            source: source.into(),
            content: content.into(),
        }
    }

    pub fn tool_calls(source: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self::ToolCalls {
            source: source.into(),
            calls,
        }
    }

    pub fn tool_results(results: Vec<ToolOutcome>) -> Self {
        Self::ToolResults { results }
    }

    /// Text shown to a person reading the transcript.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::User { content, .. } | Self::Assistant { content, .. } => Some(content),
            Self::ToolCalls { .. } | Self::ToolResults { .. } => None,
        }
    }

    fn push_chat_messages(&self, out: &mut Vec<ChatMessage>) {
        match self {
            Self::User { content, .. } => out.push(ChatMessage::user(content.clone())),
            Self::Assistant { content, .. } => out.push(ChatMessage::assistant(content.clone())),
            Self::ToolCalls { calls, .. } => {
                out.push(ChatMessage::assistant_with_tool_calls("", calls.clone()))
            }
            Self::ToolResults { results } => out.extend(
                results
                    .iter()
                    .map(|r| ChatMessage::tool_result(r.call_id.clone(), r.content.clone())),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationContext {
    turns: Vec<Turn>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_user(content: impl Into<String>) -> Self {
        let mut context = Self::new();
        context.push(Turn::user(content));
        context
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// A copy of this context with `turns` appended.
    pub fn extended(&self, turns: impl IntoIterator<Item = Turn>) -> Self {
        let mut next = self.clone();
        next.turns.extend(turns);
        next
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// True when every turn of `self` appears, in order, at the start of
    /// `other`.
    pub fn is_prefix_of(&self, other: &ConversationContext) -> bool {
        other.turns.starts_with(&self.turns)
    }

    /// Renders the history as provider messages behind a system prompt.
    pub fn to_chat_messages(&self, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        for turn in &self.turns {
            turn.push_chat_messages(&mut messages);
        }
        messages
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<'a> IntoIterator for &'a ConversationContext {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: "{}".into(),
        }
    }

    fn sample() -> ConversationContext {
        let mut context = ConversationContext::from_user("I need quality review");
        let c = call("call_1", "review_project_quality");
        context.push(Turn::tool_calls("quality_agent", vec![c.clone()]));
        context.push(Turn::tool_results(vec![ToolOutcome::ok(&c, "done")]));
        context.push(Turn::assistant("quality_agent", "Review complete."));
        context
    }

    #[test]
    fn json_round_trip_preserves_turns() {
        let context = sample();
        let json = context.to_json().unwrap();
        let back = ConversationContext::from_json(&json).unwrap();
        assert_eq!(back, context);
        assert_eq!(back.turns(), context.turns());
    }

    #[test]
    fn serialized_form_is_a_tagged_list() {
        let json = ConversationContext::from_user("hi").to_json().unwrap();
        assert_eq!(json, r#"[{"type":"user","source":"User","content":"hi"}]"#);
    }

    #[test]
    fn extended_keeps_original_prefix() {
        let base = sample();
        let next = base.extended([Turn::user("thanks")]);
        assert_eq!(next.len(), base.len() + 1);
        assert!(base.is_prefix_of(&next));
        assert!(!next.is_prefix_of(&base));
    }

    #[test]
    fn chat_messages_pair_results_with_calls() {
        let messages = sample().to_chat_messages("persona");
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "tool", "assistant"]);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert!(messages[2].tool_calls.is_some());
    }

    #[test]
    fn text_skips_tool_records() {
        let context = sample();
        let texts: Vec<&str> = context.into_iter().filter_map(Turn::text).collect();
        assert_eq!(texts, ["I need quality review", "Review complete."]);
    }
}
