//! `focuslens decay`: Decay stale acquired knowledge and persist the result.

use super::{CliResult, build_engine, load_config};

pub async fn run() -> CliResult {
    let config = load_config()?;
    let engine = build_engine(config).await;

    let report = engine.acquisition().decay_knowledge().await;
    engine.store().flush().await?;

    println!("🍂 Knowledge decay");
    println!("  Decayed:  {}", report.decayed);
    println!("  Deleted:  {}", report.deleted);
    Ok(())
}
