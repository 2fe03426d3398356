//! Env file parsing

use crate::error::{PackError, PackResult};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// Parse an env file into the build's environment overlay
///
/// Each non-blank line is `KEY=VALUE`; a bare `KEY` takes its value from
/// the current process environment (empty when unset). Values are kept
/// verbatim after the first `=`, embedded spaces included.
pub async fn parse_env_file(path: &Path) -> PackResult<BTreeMap<String, String>> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| PackError::io(format!("open {}", path.display()), e))?;
    Ok(parse_env(&content))
}

/// Parse env file content
pub fn parse_env(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (line.to_string(), std::env::var(line).unwrap_or_default()),
        })
        .collect()
}
