pub mod factory;
pub mod ollama;
pub mod openai;

pub use factory::create_provider;
pub use ollama::OllamaProvider;
pub use openai::{DEEPSEEK_BASE_URL, OPENAI_BASE_URL, OpenAIProvider};
