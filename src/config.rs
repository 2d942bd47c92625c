//! Depot configuration
//!
//! JSON settings file, by default `<config dir>/datadepot/config.json`.
//! Every field has a default, so a partial (or missing) file is fine. The
//! API token is never stored here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::manager::ManagerSettings;
use crate::providers::http_retry::HttpRetryConfig;

const MIN_REINDEX_CONCURRENCY: usize = 1;
const MAX_REINDEX_CONCURRENCY: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write config: {0}")]
    Write(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    /// Tenant API base URL
    pub tenant_base_url: String,
    /// Storage system used when an identifier names none
    pub default_system: String,
    /// Resource name served by this depot's file manager
    pub resource: String,
    /// URI scheme for cross-system import sources
    pub ingest_scheme: String,
    /// SQLite index location
    pub index_path: PathBuf,
    pub http_timeout_secs: u64,
    pub retry: HttpRetryConfig,
    /// Bytes read for a text preview
    pub preview_text_limit: usize,
    /// Directories listed in parallel during job reindexing (1-16)
    pub reindex_concurrency: usize,
    pub postit_lifetime_secs: u64,
    pub postit_max_uses: u32,
}

impl Default for DepotConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));

        Self {
            tenant_base_url: "https://agave.designsafe-ci.org".to_string(),
            default_system: "designsafe.storage.default".to_string(),
            resource: "agave".to_string(),
            ingest_scheme: "agave".to_string(),
            index_path: data_dir.join("datadepot").join("index.db"),
            http_timeout_secs: 30,
            retry: HttpRetryConfig::default(),
            preview_text_limit: 256 * 1024,
            reindex_concurrency: 4,
            postit_lifetime_secs: 3600,
            postit_max_uses: 1,
        }
    }
}

impl DepotConfig {
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            resource: self.resource.clone(),
            default_system: self.default_system.clone(),
            ingest_scheme: self.ingest_scheme.clone(),
            preview_text_limit: self.preview_text_limit,
        }
    }
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    config_dir.join("datadepot").join("config.json")
}

/// Load configuration; a missing file yields the defaults
pub fn load_config(path: &Path) -> Result<DepotConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config at {:?}, using defaults", path);
        return Ok(DepotConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: DepotConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate_config(&mut config)?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &DepotConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Invalid(format!("Failed to serialize config: {}", e)))?;
    fs::write(path, content)?;
    tracing::info!("Config saved to {:?}", path);
    Ok(())
}

/// Check required values and clamp tunables into range
pub fn validate_config(config: &mut DepotConfig) -> Result<(), ConfigError> {
    let url = url::Url::parse(&config.tenant_base_url)
        .map_err(|e| ConfigError::Invalid(format!("tenant_base_url: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "tenant_base_url must be http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.default_system.trim().is_empty() || config.default_system.contains('/') {
        return Err(ConfigError::Invalid("default_system must be a single non-empty segment".to_string()));
    }
    if config.resource.trim().is_empty() {
        return Err(ConfigError::Invalid("resource cannot be empty".to_string()));
    }
    if config.ingest_scheme.trim().is_empty() {
        return Err(ConfigError::Invalid("ingest_scheme cannot be empty".to_string()));
    }

    config.reindex_concurrency = config
        .reindex_concurrency
        .clamp(MIN_REINDEX_CONCURRENCY, MAX_REINDEX_CONCURRENCY);
    if config.http_timeout_secs == 0 {
        config.http_timeout_secs = 30;
    }
    if config.postit_max_uses == 0 {
        config.postit_max_uses = 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let mut config = DepotConfig::default();
        assert!(validate_config(&mut config).is_ok());
        assert_eq!(config.resource, "agave");
        assert_eq!(config.reindex_concurrency, 4);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, DepotConfig::default());
    }

    #[test]
    fn test_partial_file_and_clamping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"default_system": "tenant.storage", "reindex_concurrency": 64, "retry": {"max_retries": 1}}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.default_system, "tenant.storage");
        assert_eq!(config.reindex_concurrency, MAX_REINDEX_CONCURRENCY);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.resource, "agave");
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DepotConfig {
            tenant_base_url: "ftp://tenant".to_string(),
            ..DepotConfig::default()
        };
        assert!(validate_config(&mut config).is_err());

        let mut config = DepotConfig {
            default_system: "a/b".to_string(),
            ..DepotConfig::default()
        };
        assert!(validate_config(&mut config).is_err());

        let mut config = DepotConfig {
            reindex_concurrency: 0,
            ..DepotConfig::default()
        };
        validate_config(&mut config).unwrap();
        assert_eq!(config.reindex_concurrency, MIN_REINDEX_CONCURRENCY);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = DepotConfig {
            preview_text_limit: 1024,
            ..DepotConfig::default()
        };
        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }
}
