//! `focuslens context`: One cycle for one subject.

use std::path::PathBuf;

use super::{CliResult, build_engine, load_config, load_image};

pub async fn run(subject: String, image: Option<PathBuf>) -> CliResult {
    let config = load_config()?;
    let image = match image {
        Some(path) => Some(load_image(&path).await?),
        None => None,
    };

    let engine = build_engine(config).await;
    let context = engine.before_request(&subject, image).await;
    // Let detached enrichment finish so its results are persisted.
    engine.shutdown().await?;

    if context.is_empty() {
        println!("(no context yet for \"{subject}\")");
    } else {
        println!("{context}");
    }
    Ok(())
}
