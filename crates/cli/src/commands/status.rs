//! `focuslens status`: Show configuration and knowledge store statistics.

use focuslens_config::AppConfig;

use super::{CliResult, load_config, open_store};

fn on_off(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}

pub async fn run() -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await;
    let stats = store.stats().await;

    println!("🔎 FocusLens Status");
    println!("===================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Store:        {}", config.memory.store_path().display());
    println!("  Provider:     {} ({})", config.provider.name, config.provider.model);
    println!(
        "  API key:      {}",
        if config.provider.api_key.is_some() { "set" } else { "missing" }
    );
    println!("  Search:       {} ({})", on_off(config.search.enabled), config.search.provider);
    println!("  Knowledge:    {}", on_off(config.knowledge.enabled));
    println!("  Vision:       {}", on_off(config.vlm.enabled));
    println!("  Acquisition:  {}", on_off(config.knowledge_acq.enabled));

    println!();
    println!("  Subjects:     {}", stats.subjects);
    for (kind, count) in &stats.layers {
        println!("    {:<10}  {count}", kind.as_str());
    }
    println!("  Queued tasks: {}", stats.queued_tasks);

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `focuslens onboard` first");
    }
    Ok(())
}
