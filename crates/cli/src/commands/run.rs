//! `focuslens run`: Stream focus events from stdin.
//!
//! Each line is `subject` or `subject<TAB>image-path`. The time between two
//! events is credited to the earlier subject, then a cycle runs for the new
//! one and its context block is printed, followed by a `---` line.

use std::path::Path;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use super::{CliResult, build_engine, load_config, load_image};

/// Split an event line into subject and optional image path.
pub fn parse_event(line: &str) -> (&str, Option<&str>) {
    match line.split_once('\t') {
        Some((subject, path)) if !path.trim().is_empty() => (subject.trim(), Some(path.trim())),
        Some((subject, _)) => (subject.trim(), None),
        None => (line.trim(), None),
    }
}

pub async fn run() -> CliResult {
    let config = load_config()?;
    let engine = build_engine(config).await;
    let flusher = engine.tracker().clone().spawn_flush_loop();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current: Option<(String, Instant)> = None;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        let (subject, image_path) = parse_event(&line);
        if subject.is_empty() {
            continue;
        }
        if let Some((previous, since)) = current.take() {
            engine.tracker().tick_secs(&previous, since.elapsed().as_secs());
        }

        let image = match image_path {
            Some(path) => match load_image(Path::new(path)).await {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(error = %e, "Screenshot skipped");
                    None
                }
            },
            None => None,
        };

        let context = engine.before_request(subject, image).await;
        println!("{context}\n---");
        current = Some((subject.to_string(), Instant::now()));
    }

    if let Some((previous, since)) = current {
        engine.tracker().tick_secs(&previous, since.elapsed().as_secs());
    }
    flusher.abort();
    engine.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_lines() {
        assert_eq!(parse_event("Notepad - file.txt"), ("Notepad - file.txt", None));
        assert_eq!(
            parse_event("Terminal\t/tmp/shot.png"),
            ("Terminal", Some("/tmp/shot.png"))
        );
        assert_eq!(parse_event("Terminal\t  "), ("Terminal", None));
        assert_eq!(parse_event("   "), ("", None));
    }
}
