use crate::agent::{
    AgentLoop, DEFAULT_MAX_ROUNDS, HumanAgent, HumanDesk, Persona, ToolErrorPolicy, ToolRegistry,
};
use crate::bus::{MessageBus, TopicType};
use crate::error::{AgentError, Result};
use crate::traits::Provider;
use std::sync::Arc;

#[derive(Clone)]
struct AgentSpec {
    persona: Arc<Persona>,
    tools: Arc<ToolRegistry>,
}

/// The agent types every session gets an instance of.
///
/// Personas and registries are built once here and shared by reference;
/// [`install`](Self::install) creates the per-session loops.
#[derive(Clone)]
pub struct AgentRoster {
    entry: TopicType,
    provider: Arc<dyn Provider>,
    agents: Vec<AgentSpec>,
    human: Option<(TopicType, HumanDesk)>,
    max_rounds: usize,
    tool_error_policy: ToolErrorPolicy,
}

impl AgentRoster {
    pub fn new(provider: Arc<dyn Provider>, entry: impl Into<TopicType>) -> Self {
        Self {
            entry: entry.into(),
            provider,
            agents: Vec::new(),
            human: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            tool_error_policy: ToolErrorPolicy::default(),
        }
    }

    /// Adds an agent listening on the topic named after its persona.
    pub fn with_agent(mut self, persona: Persona, tools: ToolRegistry) -> Self {
        self.agents.push(AgentSpec {
            persona: Arc::new(persona),
            tools: Arc::new(tools),
        });
        self
    }

    pub fn with_human(mut self, topic: impl Into<TopicType>, desk: HumanDesk) -> Self {
        self.human = Some((topic.into(), desk));
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_error_policy = policy;
        self
    }

    pub fn entry(&self) -> &TopicType {
        &self.entry
    }

    pub fn topics(&self) -> Vec<TopicType> {
        self.agents
            .iter()
            .map(|spec| TopicType::new(spec.persona.name.clone()))
            .chain(self.human.iter().map(|(topic, _)| topic.clone()))
            .collect()
    }

    /// Subscribes a fresh instance of every agent on `bus`.
    pub fn install(&self, bus: &MessageBus) -> Result<()> {
        if !self.topics().contains(&self.entry) {
            return Err(AgentError::Configuration(format!(
                "entry agent '{}' is not part of the roster",
                self.entry
            )));
        }

        for spec in &self.agents {
            let agent = AgentLoop::new(
                spec.persona.name.clone(),
                Arc::clone(&spec.persona),
                Arc::clone(&self.provider),
                Arc::clone(&spec.tools),
            )
            .with_max_rounds(self.max_rounds)
            .with_tool_error_policy(self.tool_error_policy);
            let topic = agent.topic().clone();
            bus.subscribe(topic, Arc::new(agent).handlers())?;
        }

        if let Some((topic, desk)) = &self.human {
            let human = Arc::new(HumanAgent::new(topic.clone(), desk.clone()));
            bus.subscribe(topic.clone(), human.handlers())?;
        }

        Ok(())
    }
}
