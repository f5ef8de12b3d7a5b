//! Queue subcommands.

use anyhow::Result;

use super::{Context, print_json};

pub async fn pending(ctx: &Context) -> Result<()> {
    print_json(&ctx.queue.get_pending().await)
}

pub async fn recent(ctx: &Context, limit: usize) -> Result<()> {
    print_json(&ctx.queue.get_recent(limit).await)
}
