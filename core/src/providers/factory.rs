use crate::config::Config;
use crate::providers::{OllamaProvider, OpenAIProvider};
use crate::traits::Provider;
use anyhow::{Result, anyhow, bail};
use std::sync::Arc;

/// Builds the provider named in `config`. The API key is expected to have
/// been resolved already (see [`Config::apply_env_api_key`]).
pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let provider_name = config.provider_name();

    match provider_name.to_lowercase().as_str() {
        "ollama" => {
            let mut provider = OllamaProvider::new()
                .with_model(config.model.clone())
                .with_temperature(config.temperature);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Ok(Arc::new(provider))
        }
        "openai" => {
            let mut provider = OpenAIProvider::new(require_key(config, provider_name)?)
                .with_model(config.model.clone())
                .with_temperature(config.temperature);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Ok(Arc::new(provider))
        }
        "deepseek" => {
            let mut provider = OpenAIProvider::deepseek(require_key(config, provider_name)?)
                .with_model(config.model.clone())
                .with_temperature(config.temperature);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Ok(Arc::new(provider))
        }
        _ => Err(anyhow!(
            "Unknown provider: {}. Available: openai, deepseek, ollama",
            provider_name
        )),
    }
}

fn require_key(config: &Config, provider: &str) -> Result<String> {
    if config.api_key.trim().is_empty() {
        bail!(
            "No API key found for {}. Set OPENAI_API_KEY, DEEPSEEK_API_KEY or SWITCHBOARD_API_KEY, or run 'switchboard onboard'.",
            provider
        );
    }
    Ok(config.api_key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_each_known_provider() {
        let mut config = Config {
            api_key: "k".into(),
            ..Config::default()
        };
        for (name, expected) in [("openai", "openai"), ("DeepSeek", "deepseek"), ("ollama", "ollama")] {
            config.provider = Some(name.into());
            assert_eq!(create_provider(&config).unwrap().name(), expected);
        }
    }

    #[test]
    fn hosted_providers_need_a_key() {
        let config = Config {
            provider: Some("openai".into()),
            ..Config::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("No API key"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = Config {
            provider: Some("glm".into()),
            ..Config::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
