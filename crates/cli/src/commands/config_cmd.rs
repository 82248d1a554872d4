//! `nexus config` — configuration management commands.

use nexus_config::{ConfigError, GovernorConfig};
use std::path::Path;

pub fn show(config: GovernorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = config;
    if config.model.api_key.is_some() {
        config.model.api_key = Some("[REDACTED]".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(config_path: &Path) {
    println!("{}", config_path.display());
}

pub fn validate(
    config_path: &Path,
    loaded: Result<GovernorConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating {}", config_path.display());

    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed and validated");

    let mut warnings = Vec::new();
    let local = config.model.api_url.as_deref().is_some_and(nexus_providers::is_local);
    if config.model.provider == "openai_compat" && config.model.api_key.is_none() && !local {
        warnings.push("No API key set (set NEXUS_API_KEY or [model].api_key)".to_string());
    }
    if config.budget.reserved_output * 2 > config.budget.total_tokens {
        warnings.push("Output reservation takes more than half of the budget".to_string());
    }
    if let Some(dir) = &config.identity.dir {
        if !Path::new(dir).is_dir() {
            warnings.push(format!("Identity directory {dir} does not exist; the skeleton identity will be used"));
        }
    }

    for w in &warnings {
        println!("   Warning: {w}");
    }

    println!();
    println!("   Provider:  {}", config.model.provider);
    println!("   Model:     {}", config.model.model);
    println!("   Budget:    {} total / {} reserved", config.budget.total_tokens, config.budget.reserved_output);
    println!(
        "   Timeouts:  identity {}ms, mood {}ms, memory {}ms, llm {}ms",
        config.timeouts.identity_ms, config.timeouts.mood_ms, config.timeouts.memory_ms, config.timeouts.llm_ms
    );
    println!("   Retry:     {} x {}ms backoff", config.retry.llm_max_retries, config.retry.llm_backoff_ms);
    println!("   Memory:    {}", config.memory.backend);
    Ok(())
}

pub fn init(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", config_path.display()).into());
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, GovernorConfig::default_toml())?;
    println!("Wrote {}", config_path.display());
    Ok(())
}
