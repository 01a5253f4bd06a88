use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic type of the user-facing proxy every session subscribes.
pub const USER_TOPIC: &str = "user";

/// The logical role part of a topic address, e.g. `triage_agent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicType(String);

impl TopicType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn user() -> Self {
        Self::new(USER_TOPIC)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TopicType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl PartialEq<str> for TopicType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for TopicType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Full address of one conversation thread: role plus the session it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicId {
    pub topic_type: TopicType,
    pub source: String,
}

impl TopicId {
    pub fn new(topic_type: impl Into<TopicType>, source: impl Into<String>) -> Self {
        Self {
            topic_type: topic_type.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_type, self.source)
    }
}
