use anyhow::{Context, Result};
use sluice_core::ControllerConfig;
use std::path::PathBuf;

pub fn execute(path: PathBuf) -> Result<()> {
    let config = ControllerConfig::from_json_file(&path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;
    println!("✓ {} is valid", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
