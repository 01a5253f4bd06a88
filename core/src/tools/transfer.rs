use crate::bus::TopicType;
use crate::traits::DelegateTool;
use async_trait::async_trait;
use serde_json::Value;

/// Delegate tool that always hands the conversation to one fixed topic.
pub struct TransferTool {
    name: String,
    description: String,
    target: TopicType,
}

impl TransferTool {
    pub fn new(name: impl Into<String>, target: TopicType) -> Self {
        let description = format!("Transfer the conversation to {}.", target);
        Self {
            name: name.into(),
            description,
            target,
        }
    }

    /// `transfer_to_<topic>` pointing at `target`.
    pub fn to(target: impl Into<TopicType>) -> Self {
        let target = target.into();
        Self::new(format!("transfer_to_{}", target), target)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn target(&self) -> &TopicType {
        &self.target
    }
}

#[async_trait]
impl DelegateTool for TransferTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn resolve(&self, _args: Value) -> anyhow::Result<TopicType> {
        Ok(self.target.clone())
    }
}
