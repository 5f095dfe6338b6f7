//! `focuslens onboard`: First-time setup.

use focuslens_config::AppConfig;

use super::CliResult;

pub async fn run() -> CliResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🔎 FocusLens — First-Time Setup");
    println!("===============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("  Config file exists, left untouched: {}", config_path.display());
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Wrote default config: {}", config_path.display());
    }

    println!();
    println!("Next steps:");
    println!("  1. Set OPENROUTER_API_KEY (or add provider.api_key to the config)");
    println!("  2. Optionally set BRAVE_API_KEY and search.enabled = true");
    println!("  3. Try: focuslens context \"Notepad - notes.txt\"");
    Ok(())
}
