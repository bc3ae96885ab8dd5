// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging setup for the subvolume tools
//!
//! Console logging goes to stderr so command output on stdout stays
//! machine-readable. File logging is used when a log file or directory is
//! given on the command line.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing::Level;

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plaintext format
    #[default]
    Plaintext,
    /// Structured JSON format
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Log level selectable from the command line or configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    Error,
    /// The default: only problems are reported
    #[default]
    #[value(alias = "warning")]
    #[serde(alias = "warning")]
    Warn,
    Info,
    /// Per-scan summaries and lookup outcomes
    Debug,
    /// Every search call
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliLogLevel::Error => write!(f, "error"),
            CliLogLevel::Warn => write!(f, "warn"),
            CliLogLevel::Info => write!(f, "info"),
            CliLogLevel::Debug => write!(f, "debug"),
            CliLogLevel::Trace => write!(f, "trace"),
        }
    }
}

/// Logging arguments, meant to be flattened into a clap parser.
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    /// Log verbosity level
    #[arg(long, value_enum, global = true, help = "Log verbosity level (default: warn)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    /// Log output format
    #[arg(long, value_enum, global = true, help = "Log output format (default: plaintext)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// Directory for log files
    #[arg(long, global = true, help = "Write logs into this directory instead of stderr")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Log filename
    #[arg(long, global = true, help = "Write logs to this file instead of stderr")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl CliLoggingArgs {
    /// Initialize logging, falling back to `default_level` and
    /// `default_format` for options not given on the command line.
    pub fn init(
        &self,
        component: &str,
        default_level: CliLogLevel,
        default_format: LogFormat,
    ) -> anyhow::Result<()> {
        let level = self.log_level.unwrap_or(default_level).into();
        let format = self.log_format.unwrap_or(default_format);

        if self.logs_to_file() {
            let log_path = self.resolve_log_path(component);
            init_to_file(component, level, format, &log_path)
        } else {
            init(component, level, format)
        }
    }

    pub fn logs_to_file(&self) -> bool {
        self.log_file.is_some() || self.log_dir.is_some()
    }

    /// Resolve the log file path:
    /// 1. an absolute `log_file` is used as is
    /// 2. a relative `log_file` is placed under `log_dir` when one is given
    /// 3. `log_dir` alone gets `<component>.log`
    /// 4. otherwise the platform standard location
    pub fn resolve_log_path(&self, component: &str) -> PathBuf {
        match (&self.log_file, &self.log_dir) {
            (Some(file), _) if Path::new(file).is_absolute() => PathBuf::from(file),
            (Some(file), Some(dir)) => Path::new(dir).join(file),
            (Some(file), None) => PathBuf::from(file),
            (None, Some(dir)) => Path::new(dir).join(format!("{}.log", component)),
            (None, None) => standard_log_path(component),
        }
    }
}

/// Platform standard log file for `component`
///
/// - Linux: `~/.local/share/subvol/<component>.log`
/// - macOS: `~/Library/Logs/subvol/<component>.log`
/// - other: `<data dir or home>/subvol/<component>.log`
pub fn standard_log_path(component: &str) -> PathBuf {
    #[cfg(target_os = "macos")]
    let mut path = {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        path.push("Library");
        path.push("Logs");
        path
    };

    #[cfg(not(target_os = "macos"))]
    let mut path = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp")));

    path.push("subvol");
    path.push(format!("{}.log", component));
    path
}

/// Initialize logging to stderr
pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stderr)
}

/// Initialize logging to a file, creating its directory and appending to it
pub fn init_to_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_path: &Path,
) -> anyhow::Result<()> {
    use std::fs;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = fs::OpenOptions::new().create(true).append(true).open(log_path)?;

    init_with_writer(component, default_level, format, log_file)
}

/// Filter used when `RUST_LOG` is unset: `default_level` everywhere, including
/// the component's own target
pub fn default_filter(component: &str, default_level: Level) -> EnvFilter {
    let target = component.replace('-', "_");
    EnvFilter::new(format!("{},{}={}", default_level, target, default_level))
}

/// Initialize logging with a custom writer
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(component, default_level));

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_cli_log_level_conversion() {
        assert_eq!(Level::from(CliLogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::Info), Level::INFO);
        assert_eq!(Level::from(CliLogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(CliLogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_cli_log_level_parse_and_display() {
        for level in CliLogLevel::value_variants() {
            assert_eq!(CliLogLevel::from_str(&level.to_string(), false), Ok(*level));
        }
        assert_eq!(CliLogLevel::from_str("WARNING", true), Ok(CliLogLevel::Warn));
        assert!(CliLogLevel::from_str("loud", true).is_err());
        assert_eq!(CliLogLevel::default(), CliLogLevel::Warn);
        assert_eq!(
            serde_json::from_str::<CliLogLevel>("\"warning\"").unwrap(),
            CliLogLevel::Warn
        );
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::from_str("JSON", true), Ok(LogFormat::Json));
        assert_eq!(LogFormat::from_str("plaintext", false), Ok(LogFormat::Plaintext));
        assert!(LogFormat::from_str("xml", true).is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_log_path_resolution() {
        let args = CliLoggingArgs {
            log_file: Some("/var/log/subvol.log".into()),
            log_dir: Some("/ignored".into()),
            ..Default::default()
        };
        assert_eq!(args.resolve_log_path("subvol"), PathBuf::from("/var/log/subvol.log"));

        let args = CliLoggingArgs {
            log_file: Some("run.log".into()),
            log_dir: Some("/tmp/logs".into()),
            ..Default::default()
        };
        assert_eq!(args.resolve_log_path("subvol"), PathBuf::from("/tmp/logs/run.log"));

        let args = CliLoggingArgs {
            log_dir: Some("/tmp/logs".into()),
            ..Default::default()
        };
        assert!(args.logs_to_file());
        assert_eq!(args.resolve_log_path("subvol"), PathBuf::from("/tmp/logs/subvol.log"));

        let args = CliLoggingArgs::default();
        assert!(!args.logs_to_file());
        assert!(args.resolve_log_path("subvol").ends_with("subvol/subvol.log"));
    }

    #[test]
    fn test_args_serialize_kebab_case_and_skip_unset() {
        let args = CliLoggingArgs {
            log_level: Some(CliLogLevel::Debug),
            ..Default::default()
        };
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json, serde_json::json!({ "log-level": "debug" }));
    }

    #[test]
    fn test_init_to_file_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("subvol.log");
        // Another test may already have installed a global subscriber; the
        // file is created before that is checked.
        let _ = init_to_file("subvol", Level::INFO, LogFormat::Json, &path);
        assert!(path.exists());
    }
}
