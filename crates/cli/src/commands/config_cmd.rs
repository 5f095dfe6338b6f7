//! `focuslens config`: Show or validate the effective configuration.

use focuslens_config::AppConfig;

use super::{CliResult, load_config};

const REDACTED: &str = "[REDACTED]";

/// The effective config as TOML, with secrets replaced.
pub fn render(config: &AppConfig) -> CliResult<String> {
    let mut shown = config.clone();
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some(REDACTED.into());
    }
    if shown.search.api_key.is_some() {
        shown.search.api_key = Some(REDACTED.into());
    }
    Ok(toml::to_string_pretty(&shown)?)
}

pub async fn show() -> CliResult {
    let config = load_config()?;
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", render(&config)?);
    Ok(())
}

pub async fn validate() -> CliResult {
    println!("🔍 Validating configuration...");
    let config = load_config()?;
    config.validate()?;
    println!("   ✅ Config parsed and validated");

    let mut warnings = Vec::new();
    if config.provider.api_key.is_none() {
        warnings.push("No provider API key (set OPENROUTER_API_KEY or OPENAI_API_KEY)");
    }
    if config.search.enabled && config.search.api_key.is_none() {
        warnings.push("Search enabled without an API key (set BRAVE_API_KEY)");
    }
    for w in &warnings {
        println!("   ⚠️  {w}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_redacts_keys() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-or-v1-secret".into());
        config.search.api_key = Some("brave-secret".into());
        let text = render(&config).unwrap();
        assert!(!text.contains("secret"));
        assert!(text.contains(REDACTED));
    }
}
