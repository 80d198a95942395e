use super::types::StoreConfig;
use crate::error::{LocalRefError, Result};
use std::path::Path;

/// Parse a YAML config file into a StoreConfig
pub fn parse_config(path: &Path) -> Result<StoreConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse a YAML string into a StoreConfig. An empty document yields the defaults.
pub fn parse_config_str(content: &str) -> Result<StoreConfig> {
    if content.trim().is_empty() {
        return Ok(StoreConfig::default());
    }
    let config: StoreConfig = serde_yaml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &StoreConfig) -> Result<()> {
    if config.max_emit_depth == Some(0) {
        return Err(LocalRefError::Config(
            "max_emit_depth must be at least 1; omit it for no limit".into(),
        ));
    }
    Ok(())
}
