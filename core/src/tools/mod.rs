pub mod project;
pub mod transfer;

pub use project::{CreateProjectPlanTool, CreateUuidTool, ExecuteProjectTaskTool, ReviewProjectQualityTool};
pub use transfer::TransferTool;
