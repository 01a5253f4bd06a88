use anyhow::{Context, Result};
use console::style;
use dialoguer::{Input, Select};
use std::path::Path;
use switchboard_core::config::{Config, get_config_path};

use crate::roster;

const BANNER: &str = r"
    ------------------------------------------
      s w i t c h b o a r d
      agents that hand the conversation off
    ------------------------------------------
";

struct ProviderChoice {
    id: &'static str,
    label: &'static str,
    models: &'static [&'static str],
    needs_key: bool,
}

const PROVIDERS: &[ProviderChoice] = &[
    ProviderChoice {
        id: "openai",
        label: "OpenAI",
        models: &["gpt-4o", "gpt-4o-mini", "gpt-5", "gpt-5-mini"],
        needs_key: true,
    },
    ProviderChoice {
        id: "deepseek",
        label: "DeepSeek",
        models: &["deepseek-chat", "deepseek-reasoner"],
        needs_key: true,
    },
    ProviderChoice {
        id: "ollama",
        label: "Ollama (local)",
        models: &["llama3.2", "qwen2.5", "mistral"],
        needs_key: false,
    },
];

fn print_step(step: usize, total: usize, title: &str) {
    println!();
    println!(
        "{}",
        style(format!("[{}/{}] {}", step, total, title))
            .cyan()
            .bold()
    );
    println!();
}

fn setup_provider() -> Result<&'static ProviderChoice> {
    let labels: Vec<&str> = PROVIDERS.iter().map(|p| p.label).collect();
    let selection = Select::new()
        .with_prompt("Select your model provider")
        .items(&labels)
        .default(0)
        .interact()
        .context("Failed to select provider")?;
    Ok(&PROVIDERS[selection])
}

fn setup_api_key(provider: &ProviderChoice) -> Result<String> {
    if !provider.needs_key {
        return Ok(String::new());
    }

    let api_key: String = Input::new()
        .with_prompt(format!("Enter your {} API key", provider.label))
        .interact_text()
        .context("Failed to read API key")?;

    if api_key.trim().is_empty() {
        anyhow::bail!("API key cannot be empty");
    }

    Ok(api_key.trim().to_string())
}

fn setup_model(provider: &ProviderChoice) -> Result<String> {
    let selection = Select::new()
        .with_prompt("Select your model")
        .items(provider.models)
        .default(0)
        .interact()
        .context("Failed to select model")?;

    Ok(provider.models[selection].to_string())
}

/// Creates `<workspace>/personas` with a README listing the files that
/// override built-in prompts.
fn create_persona_dir(workspace: &Path) -> Result<()> {
    let dir = workspace.join("personas");
    std::fs::create_dir_all(&dir)?;

    let readme = dir.join("README.md");
    if !readme.exists() {
        let topics = [
            roster::TRIAGE,
            roster::EXECUTION,
            roster::QUALITY,
            roster::PROJECT_MANAGEMENT,
            roster::USER_STORIES,
        ];
        let mut content = String::from(
            "# Persona overrides\n\nDrop a `<agent>.md` file here to replace that agent's system prompt.\n\n",
        );
        for topic in topics {
            content.push_str(&format!("- `{}.md`\n", topic));
        }
        std::fs::write(readme, content)?;
    }
    Ok(())
}

pub fn run_onboard() -> Result<Config> {
    println!("{}", style(BANNER).cyan().bold());
    println!("  {}", style("Welcome to switchboard!").white().bold());
    println!(
        "  {}",
        style("This wizard writes your provider settings and workspace.").dim()
    );

    print_step(1, 4, "Provider");
    let provider = setup_provider()?;

    print_step(2, 4, "API Key");
    let api_key = setup_api_key(provider)?;
    if !provider.needs_key {
        println!("  {} No key needed for {}", style("✓").green(), provider.label);
    }

    print_step(3, 4, "Model Selection");
    let model = setup_model(provider)?;

    let config = Config {
        provider: Some(provider.id.to_string()),
        api_key,
        model,
        text_tool_protocol: provider.id == "ollama",
        ..Default::default()
    };

    print_step(4, 4, "Workspace Setup");
    match create_persona_dir(&config.workspace_dir) {
        Ok(()) => println!(
            "  {} Persona overrides go in {}",
            style("✓").green(),
            style(config.workspace_dir.join("personas").display()).cyan()
        ),
        Err(e) => eprintln!(
            "  {} Warning: Could not create workspace: {}",
            style("!").yellow(),
            e
        ),
    }

    println!();
    println!("  {} Configuration complete!", style("✓").green().bold());
    println!(
        "  {} Config saved to {}",
        style("→").green(),
        style(get_config_path().display()).cyan()
    );
    println!(
        "  {} Start the server with {} or try {}",
        style("→").green(),
        style("switchboard serve").cyan().bold(),
        style("switchboard chat").cyan().bold()
    );
    println!();

    Ok(config)
}
