// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Layered configuration for the `subvol` tool.
//!
//! Precedence, lowest first: built-in defaults, the TOML config file,
//! `SUBVOL_*` environment variables, command-line flags. Layers are merged as
//! JSON and extracted into [`SubvolConfig`] at the end.

pub mod error;
pub mod layers;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as J;
use subvol_core::cursor::{MAX_SEARCH_BUFFER, MIN_SEARCH_BUFFER};
use subvol_core::SearchOptions;
use subvol_logging::{CliLogLevel, LogFormat};
use tracing::debug;

pub use error::ConfigError;

/// How command results are printed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Tab-separated `KEY=value` lines
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SubvolConfig {
    /// Bytes requested per tree search call
    pub search_buffer_size: usize,
    pub log_level: CliLogLevel,
    pub log_format: LogFormat,
    pub output: OutputFormat,
}

impl Default for SubvolConfig {
    fn default() -> Self {
        Self {
            search_buffer_size: SearchOptions::default().buffer_size,
            log_level: CliLogLevel::default(),
            log_format: LogFormat::default(),
            output: OutputFormat::default(),
        }
    }
}

impl SubvolConfig {
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions::with_buffer_size(self.search_buffer_size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SEARCH_BUFFER..=MAX_SEARCH_BUFFER).contains(&self.search_buffer_size) {
            return Err(ConfigError::Invalid(format!(
                "search-buffer-size must be between {} and {} bytes, got {}",
                MIN_SEARCH_BUFFER, MAX_SEARCH_BUFFER, self.search_buffer_size
            )));
        }
        Ok(())
    }
}

/// Where configuration comes from
#[derive(Clone, Debug, Default)]
pub struct Sources {
    /// File given with `--config`; must exist
    pub explicit_file: Option<PathBuf>,
    /// Default per-user file; skipped when missing
    pub user_file: Option<PathBuf>,
    /// Replaces the process environment when set
    pub env: Option<config::Map<String, String>>,
}

impl Sources {
    /// Standard sources: the per-user file and the process environment
    pub fn discover(explicit_file: Option<PathBuf>) -> Self {
        Self {
            explicit_file,
            user_file: user_config_path(),
            env: None,
        }
    }
}

/// `$XDG_CONFIG_HOME/subvol/config.toml`, falling back to the platform
/// config directory
pub fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("subvol").join("config.toml"))
}

/// Merge all layers and extract the result.
///
/// `flags` are `(kebab-key, value)` pairs for options given on the command line.
pub fn load(sources: &Sources, flags: &[(&str, J)]) -> Result<SubvolConfig, ConfigError> {
    let mut json = serde_json::to_value(SubvolConfig::default())
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    if let Some(path) = config_file(sources) {
        debug!(operation = "load_config", path = %path.display(), "Reading config file");
        layers::merge_two_json(&mut json, layers::file_layer(path)?);
    }
    layers::merge_two_json(&mut json, layers::env_layer(sources.env.clone())?);
    layers::merge_two_json(&mut json, layers::flags_layer(flags));

    let config: SubvolConfig =
        serde_json::from_value(json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    config.validate()?;
    debug!(operation = "load_config", config = ?config, "Configuration resolved");
    Ok(config)
}

fn config_file(sources: &Sources) -> Option<&Path> {
    match (&sources.explicit_file, &sources.user_file) {
        (Some(explicit), _) => Some(explicit.as_path()),
        (None, Some(user)) if user.exists() => Some(user.as_path()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn isolated(explicit_file: Option<PathBuf>, user_file: Option<PathBuf>) -> Sources {
        Sources {
            explicit_file,
            user_file,
            env: Some(config::Map::new()),
        }
    }

    #[test]
    fn test_defaults_without_any_layer() {
        let config = load(&isolated(None, None), &[]).unwrap();
        assert_eq!(config, SubvolConfig::default());
        assert_eq!(config.search_buffer_size, 64 * 1024);
        assert_eq!(config.log_level, CliLogLevel::Warn);
    }

    #[test]
    fn test_precedence_file_env_flags() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("config.toml");
        fs::write(
            &user,
            "search-buffer-size = 8192\nlog-level = \"info\"\noutput = \"json\"\n",
        )
        .unwrap();

        let mut sources = isolated(None, Some(user));
        let mut env = config::Map::new();
        env.insert("SUBVOL_LOG_LEVEL".to_string(), "debug".to_string());
        env.insert("SUBVOL_SEARCH_BUFFER_SIZE".to_string(), "16384".to_string());
        sources.env = Some(env);

        let config = load(&sources, &[("search-buffer-size", json!(4096))]).unwrap();
        assert_eq!(config.search_buffer_size, 4096);
        assert_eq!(config.log_level, CliLogLevel::Debug);
        assert_eq!(config.output, OutputFormat::Json);
        assert_eq!(config.log_format, LogFormat::Plaintext);
        assert_eq!(config.search_options().buffer_size, 4096);
    }

    #[test]
    fn test_missing_user_file_is_skipped_but_explicit_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        assert!(load(&isolated(None, Some(missing.clone())), &[]).is_ok());
        let err = load(&isolated(Some(missing), None), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_explicit_file_replaces_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let explicit = dir.path().join("explicit.toml");
        fs::write(&user, "output = \"json\"\n").unwrap();
        fs::write(&explicit, "log-format = \"json\"\n").unwrap();

        let config = load(&isolated(Some(explicit), Some(user)), &[]).unwrap();
        assert_eq!(config.output, OutputFormat::Text);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_out_of_range_buffer_is_invalid() {
        let err = load(&isolated(None, None), &[("search-buffer-size", json!(16))]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("search-buffer-size")));
    }

    #[test]
    fn test_malformed_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "search-buffer-size = [").unwrap();
        let err = load(&isolated(Some(path), None), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_wrong_type_is_invalid() {
        let err = load(&isolated(None, None), &[("output", json!("yaml"))]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
