use anyhow::Result;
use std::sync::Arc;
use switchboard_core::agent::{HumanDesk, Persona, ToolRegistry};
use switchboard_core::bus::TopicType;
use switchboard_core::config::Config;
use switchboard_core::session::AgentRoster;
use switchboard_core::tools::{
    CreateProjectPlanTool, CreateUuidTool, ExecuteProjectTaskTool, ReviewProjectQualityTool,
    TransferTool,
};
use switchboard_core::traits::{Provider, Typed};

pub const TRIAGE: &str = "triage_agent";
pub const EXECUTION: &str = "execution_agent";
pub const QUALITY: &str = "quality_agent";
pub const PROJECT_MANAGEMENT: &str = "project_management_agent";
pub const USER_STORIES: &str = "user_stories_agent";
pub const HUMAN: &str = "human_agent";

const TRIAGE_PROMPT: &str = "You are a project management triage agent. Your role is to:
1. Understand the user's request
2. Route them to the appropriate specialized agent
3. Use the transfer tools to delegate tasks

Available specialized agents:
- Project Management Agent: For PMI-compliant project management plans and best practices
- Execution Agent: For task execution and project management
- Quality Agent: For quality assurance and project reviews
- User Stories Agent: For user stories with EARS notation acceptance criteria
- Human Agent: For complex requests requiring human intervention

Always be helpful and professional. Route users to the most appropriate agent.";

const EXECUTION_PROMPT: &str = "You are a project execution agent. Your role is to:
1. Help users execute project tasks
2. Track priorities and report what was done
3. Use the execute_project_task tool to run tasks
4. Transfer back to triage if the request is outside your scope

Always be precise about which task ran and with what priority.";

const QUALITY_PROMPT: &str = "You are a project quality agent. Your role is to:
1. Help users review project quality
2. Conduct quality assessments
3. Use the review_project_quality tool when needed
4. Transfer back to triage if the request is outside your scope

Always be thorough and quality-focused. Maintain high standards.";

const PROJECT_MANAGEMENT_PROMPT: &str = "You are a certified Project Management Professional (PMP) agent specializing in PMI best practices. Your role is to:
1. Guide users through PMI project management standards
2. Help create comprehensive project management plans with the create_project_plan tool
3. Cover scope, schedule, cost, quality, risk, communication and stakeholder management
4. Transfer back to triage if the request is outside your scope or when the user is satisfied with the plan";

const USER_STORIES_PROMPT: &str = "You are a User Stories Gathering Agent specializing in comprehensive user stories with EARS (Easy Approach to Requirements Syntax) acceptance criteria.

When generating user stories, always:
- Follow the 'As a... I want... So that...' format
- Include multiple acceptance criteria per story
- Address both the happy path and edge cases such as invalid input, rate limits and error recovery
- Ask the user whether the stories are complete

If the user is satisfied with the user stories, use transfer_back_to_triage.";

fn back_to_triage() -> TransferTool {
    TransferTool::new("transfer_back_to_triage", TopicType::new(TRIAGE))
        .with_description("Transfer control back to the triage agent.")
}

fn escalate() -> TransferTool {
    TransferTool::new("escalate_to_human", TopicType::new(HUMAN))
        .with_description("Escalate the request to a human agent.")
}

/// The project-management roster served by `serve` and `chat`.
pub fn default_roster(
    config: &Config,
    provider: Arc<dyn Provider>,
    desk: HumanDesk,
) -> Result<AgentRoster> {
    let persona = |name: &str, description: &str, prompt: &str| {
        Persona::new(name, description, prompt)
            .with_text_tool_protocol(config.text_tool_protocol)
            .with_override_from(&config.workspace_dir)
    };

    let triage_tools = ToolRegistry::new()
        .with_tool(Typed(CreateUuidTool))?
        .with_delegate(TransferTool::to(EXECUTION))?
        .with_delegate(TransferTool::to(QUALITY))?
        .with_delegate(TransferTool::to(PROJECT_MANAGEMENT))?
        .with_delegate(TransferTool::to(USER_STORIES))?
        .with_delegate(escalate())?;

    let execution_tools = ToolRegistry::new()
        .with_tool(Typed(ExecuteProjectTaskTool))?
        .with_delegate(back_to_triage())?
        .with_delegate(escalate())?;

    let quality_tools = ToolRegistry::new()
        .with_tool(Typed(ReviewProjectQualityTool))?
        .with_delegate(back_to_triage())?
        .with_delegate(escalate())?;

    let project_tools = ToolRegistry::new()
        .with_tool(Typed(CreateProjectPlanTool))?
        .with_tool(Typed(CreateUuidTool))?
        .with_delegate(back_to_triage())?
        .with_delegate(escalate())?;

    let story_tools = ToolRegistry::new()
        .with_delegate(back_to_triage())?
        .with_delegate(escalate())?;

    Ok(AgentRoster::new(provider, TRIAGE)
        .with_agent(
            persona(TRIAGE, "Routes user requests to the right specialist.", TRIAGE_PROMPT),
            triage_tools,
        )
        .with_agent(
            persona(EXECUTION, "Executes project tasks.", EXECUTION_PROMPT),
            execution_tools,
        )
        .with_agent(
            persona(QUALITY, "Quality assurance and project reviews.", QUALITY_PROMPT),
            quality_tools,
        )
        .with_agent(
            persona(
                PROJECT_MANAGEMENT,
                "PMI best practices and project management planning.",
                PROJECT_MANAGEMENT_PROMPT,
            ),
            project_tools,
        )
        .with_agent(
            persona(USER_STORIES, "User stories with EARS acceptance criteria.", USER_STORIES_PROMPT),
            story_tools,
        )
        .with_human(HUMAN, desk)
        .with_max_rounds(config.max_rounds)
        .with_tool_error_policy(config.tool_error_policy))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use switchboard_core::traits::{ChatRequest, ChatResponse};

    pub(crate) struct Silent;

    #[async_trait::async_trait]
    impl Provider for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn chat(&self, _request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse::text("ok"))
        }
    }

    #[test]
    fn roster_covers_every_topic() {
        let (desk, _requests) = HumanDesk::channel(1);
        let roster = default_roster(&Config::default(), Arc::new(Silent), desk).unwrap();

        let mut topics: Vec<String> = roster.topics().iter().map(|t| t.to_string()).collect();
        topics.sort();
        assert_eq!(
            topics,
            [EXECUTION, HUMAN, PROJECT_MANAGEMENT, QUALITY, TRIAGE, USER_STORIES]
        );
        assert_eq!(roster.entry(), &TopicType::new(TRIAGE));
    }
}
