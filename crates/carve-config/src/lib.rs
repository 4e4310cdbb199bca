//! Configuration for carve: code style preferences and logging.
//!
//! Configuration lives in a `carve.toml` at the workspace root:
//!
//! ```toml
//! [style.prefer_static_local_function]
//! value = "always"
//! severity = "suggestion"
//!
//! [style.local_function_body]
//! value = "when_on_single_line"
//!
//! [logging]
//! level = "carve.refactor=debug"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::ReentrantMutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod diagnostics;
mod logging;
mod schema;
mod style;

pub use diagnostics::{ConfigDiagnostics, ConfigWarning};
pub use logging::{init_tracing, LoggingConfig};
pub use schema::json_schema;
pub use style::{
    BodyForm, ImplicitTyping, Severity, StaticPreference, StyleOption, StyleOptions,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct CarveConfig {
    /// Code style preferences applied to extracted functions.
    #[serde(default)]
    pub style: StyleOptions,

    /// Logging settings for carve crates.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

fn sanitize_toml_error_message(message: &str) -> String {
    // Config errors end up in logs; keep quoted user values out of them.
    static QUOTED_STRING_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let re = QUOTED_STRING_RE.get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*""#).ok());
    match re {
        Some(re) => re.replace_all(message, r#""<redacted>""#).into_owned(),
        None => message.to_owned(),
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` includes a source snippet; keep only the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

impl CarveConfig {
    /// Installs the global `tracing` subscriber for [`CarveConfig::logging`].
    pub fn init_tracing(&self) {
        init_tracing(&self.logging);
    }

    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = read_config(path.as_ref())?;
        Self::load_from_str(&text)
    }

    /// Load a config from a TOML string.
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file from TOML and report unknown keys and recoverable problems.
    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let text = read_config(path.as_ref())?;
        Self::load_from_str_with_diagnostics(&text)
    }

    /// Load a config from a TOML string and report unknown keys and recoverable problems.
    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<CarveConfig>(text)?;
        for key in &unknown_keys {
            tracing::warn!(target: "carve.config", key = %key, "ignoring unknown config key");
        }
        let diagnostics = ConfigDiagnostics {
            unknown_keys,
            warnings: config.logging.warnings(),
        };
        Ok((config, diagnostics))
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Overrides discovery with an explicit config path, relative to the workspace root unless absolute.
pub const CARVE_CONFIG_ENV_VAR: &str = "CARVE_CONFIG_PATH";

/// File names looked up in the workspace root, in order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["carve.toml", ".carve.toml"];

fn env_lock() -> &'static ReentrantMutex<()> {
    static LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();
    LOCK.get_or_init(ReentrantMutex::default)
}

/// Runs `f` with [`CARVE_CONFIG_ENV_VAR`] held stable against [`discover_config_path`] on other threads.
///
/// The lock is reentrant, so `f` may call discovery itself.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _held = env_lock().lock();
    f()
}

/// Finds the config file for `workspace_root`: the [`CARVE_CONFIG_ENV_VAR`] override first,
/// then the first of [`CONFIG_FILE_NAMES`] that exists.
///
/// The override is returned even when the file is missing so loading reports it.
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let found = with_config_env_lock(|| match std::env::var_os(CARVE_CONFIG_ENV_VAR) {
        Some(value) => Some(workspace_root.join(value)),
        None => CONFIG_FILE_NAMES
            .iter()
            .map(|name| workspace_root.join(name))
            .find(|candidate| candidate.is_file()),
    })?;
    tracing::debug!(target: "carve.config", path = %found.display(), "discovered config");
    Some(found.canonicalize().unwrap_or(found))
}

/// Loads the discovered config, or the defaults when there is none.
pub fn load_for_workspace(workspace_root: &Path) -> Result<(CarveConfig, Option<PathBuf>), ConfigError> {
    match discover_config_path(workspace_root) {
        Some(path) => Ok((CarveConfig::load_from_path(&path)?, Some(path))),
        None => Ok((CarveConfig::default(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_errors_redact_quoted_values() {
        let err = CarveConfig::load_from_str("[logging]\njson = \"secret\"\n").unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("secret"), "{message}");
        assert!(message.starts_with("failed to parse toml config"), "{message}");
    }

    #[test]
    fn defaults_match_an_empty_file() {
        let config = CarveConfig::load_from_str("").unwrap();
        assert_eq!(config, CarveConfig::default());
        assert_eq!(
            config.style.prefer_static_local_function.value,
            StaticPreference::Default
        );
        assert_eq!(config.style.local_function_body.value, BodyForm::Block);
        assert_eq!(config.style.implicit_typing.value, ImplicitTyping::Never);
        assert!(config.logging.stderr);
    }
}
