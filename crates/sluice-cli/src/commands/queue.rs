//! Queue inspection commands

use anyhow::{Context, Result};
use sluice_queue::{FileQueueConfig, FileRequestQueue};
use std::path::{Path, PathBuf};

fn open(queue_dir: &Path) -> Result<FileRequestQueue> {
    if !queue_dir.exists() {
        anyhow::bail!("no request queue at {}", queue_dir.display());
    }
    FileRequestQueue::open(FileQueueConfig::new(queue_dir))
        .with_context(|| format!("Failed to open request queue at {}", queue_dir.display()))
}

pub fn status(queue_dir: PathBuf) -> Result<()> {
    tracing::info!("Checking queue status: {}", queue_dir.display());
    let queue = open(&queue_dir)?;
    let stats = queue.stats();

    println!("\nRequest Queue");
    println!("{}", "=".repeat(60));
    println!("Path: {}", queue_dir.display());
    println!("  Acknowledged: {}", stats.acknowledged);
    println!("  Tail:         {}", stats.tail);
    println!("  Pending:      {}", stats.pending);
    println!("  Log bytes:    {}", stats.log_bytes);

    if stats.pending == 0 {
        println!("\n✓ All requests acknowledged");
    } else {
        println!("\n{} request(s) awaiting the pipeline", stats.pending);
        println!("Run 'sluice pending' to list them");
    }
    Ok(())
}

pub fn pending(queue_dir: PathBuf, json: bool) -> Result<()> {
    let queue = open(&queue_dir)?;
    let pending = queue.pending_requests();

    if json {
        for item in &pending {
            println!("{}", serde_json::to_string(item)?);
        }
        return Ok(());
    }

    if pending.is_empty() {
        println!("No pending requests");
        return Ok(());
    }
    println!("{:>8}  {:<36}  {:<10}  STREAM", "OFFSET", "REQUEST", "KIND");
    for item in pending {
        println!(
            "{:>8}  {:<36}  {:<10}  {}",
            item.offset,
            item.request.request_id.to_string(),
            item.request.kind().as_str(),
            item.request.stream
        );
    }
    Ok(())
}

pub fn compact(queue_dir: PathBuf) -> Result<()> {
    let queue = open(&queue_dir)?;
    let before = queue.stats().log_bytes;
    queue.compact().context("Failed to compact request queue")?;
    let after = queue.stats().log_bytes;
    println!("Compacted {}: {} -> {} bytes", queue_dir.display(), before, after);
    Ok(())
}
