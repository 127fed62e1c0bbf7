use std::path::Path;

use anyhow::{Context, bail};

use stratus_core::ClusterConfig;

/// Write a scaffold configuration for cluster `name` to `path`.
pub fn init(path: &Path, name: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = ClusterConfig::scaffold(name);
    config.validate()?;
    std::fs::write(path, config.to_toml_string()?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("✓ Generated {}", path.display());
    Ok(())
}
