//! Configuration file loading

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use otaguard_update::OtaConfig;
use tracing::debug;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

fn format_of(path: &Path) -> Result<Format, AgentError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "json" => Ok(Format::Json),
        "yaml" | "yml" => Ok(Format::Yaml),
        _ => Err(AgentError::UnsupportedFormat(extension)),
    }
}

/// Parse configuration text in the given format
fn parse(text: &str, format: Format) -> Result<OtaConfig, AgentError> {
    let config = match format {
        Format::Json => serde_json::from_str(text)?,
        Format::Yaml => serde_yaml::from_str(text)?,
    };
    Ok(config)
}

/// Load and validate the agent configuration
///
/// The format follows the file extension. Missing fields take their defaults.
pub fn load_config(path: &Path) -> Result<OtaConfig> {
    if !path.exists() {
        return Err(AgentError::ConfigNotFound(path.to_path_buf()).into());
    }

    let format = format_of(path)?;
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration {}", path.display()))?;
    let config = parse(&text, format)
        .with_context(|| format!("Failed to parse configuration {}", path.display()))?;

    config
        .validate()
        .map_err(|e| AgentError::InvalidConfiguration(e.to_string()))?;

    debug!(
        owner = %config.release.owner,
        repo = %config.release.repo,
        version = %config.current_version,
        "Configuration loaded"
    );
    Ok(config)
}
