pub mod human;
pub mod loop_;
pub mod parse;
pub mod persona;
pub mod registry;

pub use human::{HumanAgent, HumanDesk, HumanRequest};
pub use loop_::{AgentLoop, DEFAULT_MAX_ROUNDS, ToolErrorPolicy};
pub use persona::Persona;
pub use registry::{ToolEntry, ToolRegistry};
