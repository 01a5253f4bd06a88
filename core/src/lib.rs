pub mod agent;
pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod providers;
pub mod session;
pub mod tools;
pub mod traits;

pub use agent::{AgentLoop, HumanAgent, HumanDesk, HumanRequest, Persona, ToolErrorPolicy, ToolRegistry};
pub use bus::{MessageBus, TopicId, TopicType};
pub use config::*;
pub use context::{ConversationContext, ToolOutcome, Turn};
pub use error::{AgentError, Result};
pub use providers::*;
pub use session::{AgentRoster, Outbound, Session, SessionManager};
pub use tools::*;
pub use traits::*;
