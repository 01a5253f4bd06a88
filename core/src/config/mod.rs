use crate::agent::{DEFAULT_MAX_ROUNDS, ToolErrorPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SWITCHBOARD_DIR: &str = ".switchboard";

const GENERIC_API_KEY_VAR: &str = "SWITCHBOARD_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Sessions idle for longer than this are reaped.
    pub session_timeout_secs: u64,
    /// 0 means unlimited.
    pub max_sessions: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 3600,
            max_sessions: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_rounds: usize,
    pub tool_error_policy: ToolErrorPolicy,
    /// Ask the model for `<tool_call>` text blocks instead of native calls.
    pub text_tool_protocol: bool,
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub workspace_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_rounds: DEFAULT_MAX_ROUNDS,
            tool_error_policy: ToolErrorPolicy::default(),
            text_tool_protocol: false,
            server: ServerConfig::default(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
            workspace_dir: get_switchboard_dir().join("workspace"),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let mut config = if config_exists() {
            load_config()?
        } else {
            Config::default()
        };
        config.apply_env_api_key(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// A key found in the environment wins over the file.
    pub fn apply_env_api_key(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = self
            .api_key_vars()
            .into_iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty())
        {
            self.api_key = key;
        }
    }

    /// Environment variables consulted for the API key: the configured
    /// provider's own variable, then the generic one.
    pub fn api_key_vars(&self) -> Vec<&'static str> {
        let own = match self.provider_name().to_lowercase().as_str() {
            "openai" => Some("OPENAI_API_KEY"),
            "deepseek" => Some("DEEPSEEK_API_KEY"),
            _ => None,
        };
        own.into_iter().chain([GENERIC_API_KEY_VAR]).collect()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or("openai")
    }
}

pub fn get_switchboard_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(SWITCHBOARD_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_switchboard_dir().join("config.toml")
}

pub fn ensure_switchboard_dir() -> Result<PathBuf> {
    let dir = get_switchboard_dir();

    if !dir.exists() {
        std::fs::create_dir_all(&dir).with_context(|| {
            format!("Failed to create switchboard directory at {}", dir.display())
        })?;
    }

    Ok(dir)
}

pub fn load_config() -> Result<Config> {
    let mut config = load_config_from(&get_config_path())?;
    config.workspace_dir = get_switchboard_dir().join("workspace");
    Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::anyhow!(
                "Config file not found. Run 'switchboard onboard' to set up your configuration."
            )
        } else {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        }
    })?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    if let Some(parent) = path.parent() {
        config.workspace_dir = parent.join("workspace");
    }

    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    ensure_switchboard_dir()?;
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}
