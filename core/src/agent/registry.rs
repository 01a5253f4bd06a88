use crate::error::{AgentError, Result};
use crate::traits::{DelegateTool, Tool, ToolKind, ToolSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// A registered callable, tagged with its kind.
#[derive(Clone)]
pub enum ToolEntry {
    Direct(Arc<dyn Tool>),
    Delegate(Arc<dyn DelegateTool>),
}

impl ToolEntry {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::Direct(_) => ToolKind::Direct,
            Self::Delegate(_) => ToolKind::Delegate,
        }
    }

    pub fn spec(&self) -> ToolSpec {
        match self {
            Self::Direct(tool) => tool.spec(),
            Self::Delegate(tool) => tool.spec(),
        }
    }
}

/// Direct and delegate tools of one agent. Built once, then shared
/// read-only by every session.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: HashMap<String, ToolEntry>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Result<Self> {
        self.register(ToolEntry::Direct(Arc::new(tool)))?;
        Ok(self)
    }

    pub fn with_delegate(mut self, tool: impl DelegateTool + 'static) -> Result<Self> {
        self.register(ToolEntry::Delegate(Arc::new(tool)))?;
        Ok(self)
    }

    /// Names are unique across both kinds.
    pub fn register(&mut self, entry: ToolEntry) -> Result<()> {
        let name = entry.spec().name;
        if self.entries.contains_key(&name) {
            return Err(AgentError::Configuration(format!(
                "tool '{}' registered twice",
                name
            )));
        }
        self.order.push(name.clone());
        self.entries.insert(name, entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.get(name).map(ToolEntry::kind)
    }

    /// Schemas of every tool, direct tools first, each group in
    /// registration order.
    pub fn get_specs(&self) -> Vec<ToolSpec> {
        let direct = self.specs_of(ToolKind::Direct);
        let delegate = self.specs_of(ToolKind::Delegate);
        direct.into_iter().chain(delegate).collect()
    }

    pub fn specs_of(&self, kind: ToolKind) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .filter(|entry| entry.kind() == kind)
            .map(ToolEntry::spec)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
