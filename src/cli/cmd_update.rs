use anyhow::{Context, Result};
use bisect_builds::remote::LiveFetcher;
use bisect_builds::update;
use std::path::Path;

pub fn run(url: &str) -> Result<()> {
    let target = std::env::current_exe().context("Cannot locate the running executable")?;
    tokio::runtime::Runtime::new()?.block_on(async { run_async(url, &target).await })
}

async fn run_async(url: &str, target: &Path) -> Result<()> {
    let fetcher = LiveFetcher::new(None)?;
    update::update_script(&fetcher, url, target)
        .await
        .with_context(|| format!("Failed to update {}", target.display()))?;
    println!("Update successful!");
    Ok(())
}
