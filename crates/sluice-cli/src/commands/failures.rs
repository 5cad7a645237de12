use anyhow::{Context, Result};
use sluice_pipeline::FailedRequestLog;
use std::path::PathBuf;

pub fn execute(ledger: PathBuf, json: bool) -> Result<()> {
    let failures = FailedRequestLog::load(&ledger)
        .with_context(|| format!("Failed to read ledger {}", ledger.display()))?;

    if json {
        for entry in &failures {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    if failures.is_empty() {
        println!("No failed requests");
        return Ok(());
    }
    println!("{} failed request(s)\n", failures.len());
    for entry in failures {
        println!(
            "{}  {} {} (attempts: {})",
            entry.failed_at.to_rfc3339(),
            entry.request.kind(),
            entry.request.stream,
            entry.attempts
        );
        println!("    request: {}", entry.request.request_id);
        println!("    reason:  {}", entry.reason);
    }
    Ok(())
}
