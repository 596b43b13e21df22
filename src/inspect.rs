//! CLI commands for inspecting and resetting stored state.
//!
//! These open the configured backend directly. With the SQLite backend they
//! can run while `reply serve` is up; WAL mode lets reads proceed alongside
//! the server's writes.

use std::io::Write;

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use reply_companion_core::models::Post;

use crate::config::{Config, StorageBackend};
use crate::generation::{create_generator, GenerationRequest};
use crate::preferences;
use crate::prompt;
use crate::stores::Stores;

const PREVIEW_CHARS: usize = 60;

async fn open(config: &Config) -> Result<Stores> {
    if config.storage.backend == StorageBackend::Memory {
        eprintln!("Note: storage.backend = \"memory\"; nothing persists between runs.");
    }
    Stores::open(config).await
}

pub async fn run_cache_list(config: &Config) -> Result<()> {
    let stores = open(config).await?;
    let cache = stores.artifact_cache(config.cache.capacity)?;
    let entries = cache.entries().await?;

    if entries.is_empty() {
        println!("No cached replies.");
        return Ok(());
    }

    println!("{} / {} cached replies:", entries.len(), cache.capacity());
    for entry in &entries {
        let artifact = &entry.artifact;
        println!();
        println!("  Post:        {}", preview(entry.fingerprint.as_str()));
        println!("  Reply:       {}", preview(&artifact.generated_text));
        println!("  Model:       {}", display_or_dash(&artifact.model));
        println!("  Updated:     {}", format_timestamp(artifact.last_updated));
        if artifact.explanation.is_some() {
            println!("  Explanation: yes");
        }
        if let Some(cost) = &artifact.cost {
            println!("  Cost:        ${:.6}", cost.total_cost);
        }
    }
    Ok(())
}

pub async fn run_cache_clear(config: &Config) -> Result<()> {
    let stores = open(config).await?;
    let removed = stores.artifact_cache(config.cache.capacity)?.clear().await?;
    println!("Removed {} cached replies.", removed);
    Ok(())
}

pub async fn run_snapshot_show(config: &Config) -> Result<()> {
    let stores = open(config).await?;
    match stores.snapshots.load().await? {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("No session snapshot."),
    }
    Ok(())
}

pub async fn run_snapshot_clear(config: &Config) -> Result<()> {
    let stores = open(config).await?;
    stores.snapshots.clear().await?;
    println!("Session snapshot cleared.");
    Ok(())
}

pub async fn run_prefs_show(config: &Config) -> Result<()> {
    let stores = open(config).await?;
    let prefs = preferences::load(stores.preferences.as_ref()).await;
    println!("{}", serde_json::to_string_pretty(&prefs)?);
    Ok(())
}

pub async fn run_prefs_set(config: &Config, key: &str, value: &str) -> Result<()> {
    let stores = open(config).await?;
    let mut prefs = preferences::load(stores.preferences.as_ref()).await;
    prefs.set_field(key, value)?;
    preferences::save(stores.preferences.as_ref(), &prefs).await?;
    println!("Set {}.", key);
    Ok(())
}

/// One-off generation outside any panel. Streams to stdout; touches no cache.
pub async fn run_generate(config: &Config, text: &str) -> Result<()> {
    if !config.generation.is_enabled() {
        bail!("Generation is disabled. Set [generation] provider in the config.");
    }
    let post = Post::new(text)?;
    let stores = open(config).await?;
    let prefs = preferences::load(stores.preferences.as_ref()).await;
    let generator = create_generator(&config.generation)?;

    let request = GenerationRequest {
        prompt: prompt::reply_prompt(&post, &prefs),
        model: prefs.model.clone(),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let generation = generator.generate(&request, Some(tx));
    let print = async {
        let mut stdout = std::io::stdout();
        while let Some(chunk) = rx.recv().await {
            let _ = write!(stdout, "{}", chunk);
            let _ = stdout.flush();
        }
    };
    let (result, ()) = tokio::join!(generation, print);
    let result = result?;
    println!();

    if let Some(usage) = result.usage {
        eprintln!(
            "{} · {} prompt + {} completion tokens",
            result.model, usage.prompt_tokens, usage.completion_tokens
        );
    }
    if let Some(cost) = result.cost {
        eprintln!("cost: ${:.6}", cost.total_cost);
    }
    Ok(())
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    }
}

fn display_or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("a\n  b"), "a b");
        let long = "x".repeat(100);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 1);
        assert!(shown.ends_with('…'));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }
}
