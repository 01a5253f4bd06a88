use crate::bus::TopicType;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// Which registry a callable belongs to. The two sets are disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// The result is fed back to the calling agent.
    Direct,
    /// The result names the topic the conversation moves to.
    Delegate,
}

/// A tool whose string result is consumed by the agent that called it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> anyhow::Result<String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// A tool that hands the conversation to another agent.
#[async_trait]
pub trait DelegateTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value {
        empty_schema()
    }

    async fn resolve(&self, args: Value) -> anyhow::Result<TopicType>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// A direct tool with a serde-decoded argument type.
///
/// Wrap it in [`Typed`] to register it; decoding failures surface as tool
/// execution errors naming the tool.
#[async_trait]
pub trait TypedTool: Send + Sync {
    type Args: DeserializeOwned + Send + 'static;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    async fn run(&self, args: Self::Args) -> anyhow::Result<String>;
}

pub struct Typed<T>(pub T);

#[async_trait]
impl<T: TypedTool> Tool for Typed<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters_schema(&self) -> Value {
        self.0.parameters_schema()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let args = decode_args::<T::Args>(self.0.name(), args)?;
        self.0.run(args).await
    }
}

/// Decodes tool arguments, treating `null` as an empty object so that
/// argument-less tools accept whatever the model sends for "nothing".
pub fn decode_args<T: DeserializeOwned>(tool: &str, args: Value) -> anyhow::Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| anyhow::anyhow!("Invalid arguments for {}: {}", tool, e))
}

pub fn empty_schema() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}
