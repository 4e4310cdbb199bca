use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;

use crate::ConfigWarning;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level for every carve target (`debug`), or filter directives
    /// (`carve.flow=trace,carve.refactor=debug`).
    #[serde(default = "default_level")]
    pub level: String,

    /// One JSON object per event instead of human readable lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_stderr")]
    pub stderr: bool,

    /// Also append events to this file. An unopenable file only loses the file output.
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub file: Option<PathBuf>,
}

fn default_level() -> String {
    String::from("info")
}

fn default_stderr() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
            json: false,
            stderr: default_stderr(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// `level` as filter directives. Bare levels are matched case-insensitively
    /// and `warning` is accepted for `warn`.
    pub(crate) fn directives(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            return default_level();
        }
        let lower = level.to_ascii_lowercase();
        if lower == "warning" {
            return String::from("warn");
        }
        if LEVELS.contains(&lower.as_str()) {
            lower
        } else {
            level.to_owned()
        }
    }

    /// The filter the subscriber installs.
    ///
    /// `RUST_LOG` directives are appended to the configured ones, so they win
    /// for the targets they name. Invalid input falls back step by step down to `info`.
    pub fn env_filter(&self) -> EnvFilter {
        let configured = self.directives();
        let from_env = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let mut attempts = Vec::with_capacity(3);
        if let Some(from_env) = &from_env {
            attempts.push(format!("{configured},{from_env}"));
            attempts.push(from_env.clone());
        }
        attempts.push(configured);

        attempts
            .into_iter()
            .find_map(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
    }

    pub(crate) fn warnings(&self) -> Vec<ConfigWarning> {
        if self.level.trim().is_empty() {
            return Vec::new();
        }
        let normalized = self.directives();
        match EnvFilter::try_new(&normalized) {
            Ok(_) => Vec::new(),
            Err(_) => vec![ConfigWarning::LoggingLevelInvalid {
                value: self.level.clone(),
                normalized,
            }],
        }
    }
}

fn open_log_file(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("carve: cannot open log file {}: {err}", path.display());
            None
        }
    }
}

fn make_writer(config: &LoggingConfig) -> BoxMakeWriter {
    let file = config.file.as_deref().and_then(open_log_file).map(Mutex::new);
    match (config.stderr, file) {
        (true, Some(file)) => BoxMakeWriter::new(std::io::stderr.and(file)),
        (false, Some(file)) => BoxMakeWriter::new(file),
        (true, None) => BoxMakeWriter::new(std::io::stderr),
        (false, None) => BoxMakeWriter::new(std::io::sink),
    }
}

/// Installs the global subscriber for `config`.
///
/// Only the first call in a process has an effect, and an already installed
/// global subscriber is left alone.
pub fn init_tracing(config: &LoggingConfig) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = config.env_filter();
        let writer = make_writer(config);
        let installed = if config.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .try_init()
        };
        if installed.is_err() {
            tracing::debug!(target: "carve.config", "a global subscriber is already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_level(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_owned(),
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn bare_levels_are_normalized() {
        assert_eq!(with_level(" WARNING ").directives(), "warn");
        assert_eq!(with_level("Debug").directives(), "debug");
        assert_eq!(with_level("").directives(), "info");
    }

    #[test]
    fn directive_strings_pass_through() {
        let config = with_level("carve.flow=trace");
        assert_eq!(config.directives(), "carve.flow=trace");
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn log_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carve.log");
        assert!(open_log_file(&path).is_some());
        assert!(path.is_file());
        assert!(open_log_file(&dir.path().join("missing/carve.log")).is_none());
    }
}
