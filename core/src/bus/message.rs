use crate::bus::TopicType;
use crate::context::ConversationContext;
use serde::{Deserialize, Serialize};

/// Opens a session's conversation with the entry agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLogin {}

/// Asks the receiving agent to continue the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTask {
    pub context: ConversationContext,
}

/// A finished turn, addressed to the user topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Topic type of the agent that produced this reply; the next user
    /// turn goes back to it.
    pub reply_to: TopicType,
    pub context: ConversationContext,
}

impl AgentResponse {
    /// Text of the final turn, if it carries any.
    pub fn reply_text(&self) -> Option<&str> {
        self.context.last().and_then(|turn| turn.text())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    UserLogin,
    UserTask,
    AgentResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserLogin => "user_login",
            Self::UserTask => "user_task",
            Self::AgentResponse => "agent_response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    UserLogin(UserLogin),
    UserTask(UserTask),
    AgentResponse(AgentResponse),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::UserLogin(_) => MessageKind::UserLogin,
            Self::UserTask(_) => MessageKind::UserTask,
            Self::AgentResponse(_) => MessageKind::AgentResponse,
        }
    }

    pub fn into_user_login(self) -> Option<UserLogin> {
        match self {
            Self::UserLogin(login) => Some(login),
            _ => None,
        }
    }

    pub fn into_user_task(self) -> Option<UserTask> {
        match self {
            Self::UserTask(task) => Some(task),
            _ => None,
        }
    }

    pub fn into_agent_response(self) -> Option<AgentResponse> {
        match self {
            Self::AgentResponse(response) => Some(response),
            _ => None,
        }
    }
}

impl From<UserLogin> for Message {
    fn from(login: UserLogin) -> Self {
        Self::UserLogin(login)
    }
}

impl From<UserTask> for Message {
    fn from(task: UserTask) -> Self {
        Self::UserTask(task)
    }
}

impl From<AgentResponse> for Message {
    fn from(response: AgentResponse) -> Self {
        Self::AgentResponse(response)
    }
}
