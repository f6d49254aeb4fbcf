//! Configuration loading and schema definitions for hippod-client.
//!
//! This module provides types and functions for loading client configuration
//! from TOML files or strings. The core library never reads configuration on
//! its own: callers load a [`Config`] and hand its [`ClientConfig`] to
//! [`Container::with_config`](crate::Container::with_config).

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads client configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use hippod_client::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("hippod.toml"))?;
/// println!("Timeout: {}s", config.hippod.timeout_secs);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads client configuration from a TOML string.
///
/// # Example
///
/// ```
/// use hippod_client::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [hippod]
///     url = "http://127.0.0.1/"
///     timeout_secs = 10
/// "#)?;
///
/// assert_eq!(config.hippod.timeout_secs, 10);
/// assert_eq!(config.hippod.max_batch_records, 32);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hippod.toml");
        fs::write(
            &path,
            "[hippod]\nurl = \"http://hippod:8080/\"\nmax_batch_records = 4\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.hippod.url.as_deref(), Some("http://hippod:8080/"));
        assert_eq!(config.hippod.max_batch_records, 4);
        assert_eq!(config.hippod.timeout_secs, 30);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/hippod.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert!(config.hippod.url.is_none());
        assert_eq!(config.hippod.timeout_secs, 30);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(load_config_str("[hippod\nurl=").is_err());
    }
}
