use crate::traits::TypedTool;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CreateProjectPlanArgs {
    pub project_name: String,
    pub requirements: String,
}

pub struct CreateProjectPlanTool;

#[async_trait]
impl TypedTool for CreateProjectPlanTool {
    type Args = CreateProjectPlanArgs;

    fn name(&self) -> &str {
        "create_project_plan"
    }

    fn description(&self) -> &str {
        "Create a project plan with the given name and requirements"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_name": {
                    "type": "string",
                    "description": "The name of the project to be planned"
                },
                "requirements": {
                    "type": "string",
                    "description": "The requirements or specifications for the project"
                }
            },
            "required": ["project_name", "requirements"]
        })
    }

    async fn run(&self, args: CreateProjectPlanArgs) -> anyhow::Result<String> {
        info!(project = %args.project_name, "Creating project plan");
        Ok(format!(
            "Project plan created for {} with requirements: {}",
            args.project_name, args.requirements
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecuteProjectTaskArgs {
    pub task_name: String,
    pub priority: String,
}

pub struct ExecuteProjectTaskTool;

#[async_trait]
impl TypedTool for ExecuteProjectTaskTool {
    type Args = ExecuteProjectTaskArgs;

    fn name(&self) -> &str {
        "execute_project_task"
    }

    fn description(&self) -> &str {
        "Execute a project task with the given name and priority"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_name": {
                    "type": "string",
                    "description": "The name of the task to be executed"
                },
                "priority": {
                    "type": "string",
                    "description": "The priority level of the task"
                }
            },
            "required": ["task_name", "priority"]
        })
    }

    async fn run(&self, args: ExecuteProjectTaskArgs) -> anyhow::Result<String> {
        info!(task = %args.task_name, priority = %args.priority, "Executing task");
        Ok(format!(
            "Task '{}' with priority '{}' has been executed.",
            args.task_name, args.priority
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewProjectQualityArgs {
    pub project_id: String,
}

pub struct ReviewProjectQualityTool;

#[async_trait]
impl TypedTool for ReviewProjectQualityTool {
    type Args = ReviewProjectQualityArgs;

    fn name(&self) -> &str {
        "review_project_quality"
    }

    fn description(&self) -> &str {
        "Review the quality of a project"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": {
                    "type": "string",
                    "description": "The unique identifier of the project to be reviewed"
                }
            },
            "required": ["project_id"]
        })
    }

    async fn run(&self, args: ReviewProjectQualityArgs) -> anyhow::Result<String> {
        info!(project = %args.project_id, "Reviewing project quality");
        Ok(format!(
            "Quality review completed for project {}",
            args.project_id
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct NoArgs {}

pub struct CreateUuidTool;

#[async_trait]
impl TypedTool for CreateUuidTool {
    type Args = NoArgs;

    fn name(&self) -> &str {
        "create_uuid"
    }

    fn description(&self) -> &str {
        "Create a new random UUID"
    }

    fn parameters_schema(&self) -> Value {
        crate::traits::empty_schema()
    }

    async fn run(&self, _args: NoArgs) -> anyhow::Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
