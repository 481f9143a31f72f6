use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::settings::config::TokenWindowConfig;

/// Load the configuration snapshot for this process.
///
/// A missing file is seeded with the defaults so operators have something to
/// edit; an unreadable or invalid file is fatal. The pipeline must not start
/// against a configuration it cannot trust.
pub fn load_or_seed(path: &Path) -> Result<TokenWindowConfig> {
    if !path.exists() {
        let defaults = TokenWindowConfig::default();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {parent:?}"))?;
        }
        let contents = serde_json::to_string_pretty(&defaults)
            .context("failed to serialize default configuration")?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write default configuration to {path:?}"))?;
        return Ok(defaults);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {path:?}"))?;
    let config: TokenWindowConfig = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse configuration at {path:?}"))?;

    if let Err(reason) = config.validate() {
        bail!("invalid configuration at {path:?}: {reason}");
    }

    Ok(config)
}
