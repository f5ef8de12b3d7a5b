//! Cache subcommands.

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use corkscan_core::cache::compute_label_hash;
use serde::Serialize;

use super::{Context, print_json};

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Label text read from the bottle.
    pub text: String,

    /// Analysis result as JSON (default: `{}`).
    #[arg(long)]
    pub result: Option<String>,

    /// Label image; its SHA-256 becomes the label hash.
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Thumbnail reference stored with the entry.
    #[arg(long)]
    pub thumbnail: Option<String>,

    /// Save the entry right away.
    #[arg(long)]
    pub save: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FlagOutput<'a> {
    key: &'a str,
    found: bool,
}

pub async fn analyze(ctx: &Context, args: AnalyzeArgs) -> Result<()> {
    if args.text.trim().is_empty() {
        bail!("label text must not be empty");
    }
    let result = match args.result.as_deref() {
        Some(raw) => serde_json::from_str(raw).context("--result is not valid JSON")?,
        None => serde_json::json!({}),
    };
    let label_hash = match &args.image {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read image {}", path.display()))?;
            Some(compute_label_hash(&bytes))
        }
        None => None,
    };

    let Some(mut entry) = ctx.cache.put_analysis(&args.text, result, args.thumbnail, label_hash).await else {
        bail!("analysis could not be stored (storage available: {})", ctx.store.is_available());
    };
    if args.save && ctx.cache.mark_saved(&entry.key).await {
        entry = ctx.cache.get(&entry.key).await.unwrap_or(entry);
    }

    let evicted = ctx.cache.evict_unsaved(ctx.config.cache_max_unsaved).await;
    tracing::info!(key = %entry.key, saved = entry.saved, evicted, "analysis stored");
    print_json(&entry)
}

pub async fn save(ctx: &Context, key: &str) -> Result<()> {
    let found = ctx.cache.mark_saved(key).await;
    print_json(&FlagOutput { key, found })
}

pub async fn unsave(ctx: &Context, key: &str) -> Result<()> {
    let found = ctx.cache.get(key).await.is_some();
    ctx.cache.mark_unsaved(key).await;
    print_json(&FlagOutput { key, found })
}

pub async fn delete(ctx: &Context, key: &str) -> Result<()> {
    let found = ctx.cache.remove(key).await;
    print_json(&FlagOutput { key, found })
}

pub async fn show(ctx: &Context, key: &str) -> Result<()> {
    match ctx.cache.get(key).await {
        Some(entry) => print_json(&entry),
        None => bail!("no cached analysis for key {key}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corkscan_core::{AppConfig, LocalStore};

    async fn context() -> Context {
        Context::with_store(AppConfig::default(), LocalStore::open_in_memory().await.unwrap())
    }

    fn args(text: &str) -> AnalyzeArgs {
        AnalyzeArgs { text: text.into(), result: None, image: None, thumbnail: None, save: false }
    }

    #[tokio::test]
    async fn test_analyze_stores_and_saves() {
        let ctx = context().await;
        analyze(&ctx, AnalyzeArgs { save: true, result: Some(r#"{"grape":"merlot"}"#.into()), ..args("Pétrus 2010") })
            .await
            .unwrap();

        let entries = ctx.cache.entries().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].saved);
        assert_eq!(entries[0].result["grape"], "merlot");
    }

    #[tokio::test]
    async fn test_analyze_hashes_image() {
        let ctx = context().await;
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("label.jpg");
        std::fs::write(&image, b"label bytes").unwrap();

        analyze(&ctx, AnalyzeArgs { image: Some(image), ..args("Pétrus 2010") }).await.unwrap();

        let entry = ctx.cache.entries().await.remove(0);
        assert_eq!(entry.label_hash, Some(compute_label_hash(b"label bytes")));
    }

    #[tokio::test]
    async fn test_analyze_rejects_bad_input() {
        let ctx = context().await;
        assert!(analyze(&ctx, args("   ")).await.is_err());
        assert!(analyze(&ctx, AnalyzeArgs { result: Some("{".into()), ..args("Pétrus") }).await.is_err());
        assert!(ctx.cache.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_evicts_beyond_limit() {
        let mut ctx = context().await;
        ctx.config.cache_max_unsaved = 1;
        analyze(&ctx, args("first label")).await.unwrap();
        analyze(&ctx, args("second label")).await.unwrap();
        assert_eq!(ctx.cache.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_show_missing_key_fails() {
        let ctx = context().await;
        assert!(show(&ctx, "nope").await.is_err());
    }
}
