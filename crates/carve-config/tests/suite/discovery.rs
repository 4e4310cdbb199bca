use std::path::Path;

use carve_config::{
    discover_config_path, load_for_workspace, with_config_env_lock, CarveConfig, ConfigError,
    StaticPreference, CARVE_CONFIG_ENV_VAR,
};
use tempfile::tempdir;

/// Runs `f` with the override variable set to `value` (or removed), restoring it afterwards.
fn with_override<R>(value: Option<&Path>, f: impl FnOnce() -> R) -> R {
    with_config_env_lock(|| {
        let saved = std::env::var_os(CARVE_CONFIG_ENV_VAR);
        match value {
            Some(value) => std::env::set_var(CARVE_CONFIG_ENV_VAR, value),
            None => std::env::remove_var(CARVE_CONFIG_ENV_VAR),
        }
        let result = f();
        match saved {
            Some(saved) => std::env::set_var(CARVE_CONFIG_ENV_VAR, saved),
            None => std::env::remove_var(CARVE_CONFIG_ENV_VAR),
        }
        result
    })
}

fn canonical(path: &Path) -> std::path::PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[test]
fn carve_toml_is_found_in_the_root() {
    let root = tempdir().unwrap();
    let file = root.path().join("carve.toml");
    std::fs::write(&file, "[style.prefer_static_local_function]\nvalue = \"never\"\n").unwrap();

    let (config, path) = with_override(None, || load_for_workspace(root.path())).unwrap();

    assert_eq!(path, Some(canonical(&file)));
    assert_eq!(config.style.prefer_static_local_function.value, StaticPreference::Never);
}

#[test]
fn hidden_file_is_the_fallback() {
    let root = tempdir().unwrap();
    let hidden = root.path().join(".carve.toml");
    std::fs::write(&hidden, "").unwrap();

    let found = with_override(None, || discover_config_path(root.path()));
    assert_eq!(found, Some(canonical(&hidden)));

    std::fs::write(root.path().join("carve.toml"), "").unwrap();
    let found = with_override(None, || discover_config_path(root.path()));
    assert_eq!(found, Some(canonical(&root.path().join("carve.toml"))));
}

#[test]
fn override_wins_over_root_files() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("carve.toml"), "").unwrap();
    let custom = root.path().join("custom.toml");
    std::fs::write(&custom, "[logging]\njson = true\n").unwrap();

    let (config, path) = with_override(Some(&custom), || load_for_workspace(root.path())).unwrap();

    assert_eq!(path, Some(canonical(&custom)));
    assert!(config.logging.json);
}

#[test]
fn relative_override_resolves_against_the_root() {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("conf")).unwrap();
    let custom = root.path().join("conf").join("carve.toml");
    std::fs::write(&custom, "").unwrap();

    let found = with_override(Some(Path::new("conf/carve.toml")), || discover_config_path(root.path()));
    assert_eq!(found, Some(canonical(&custom)));
}

#[test]
fn missing_override_is_an_io_error() {
    let root = tempdir().unwrap();
    let missing = root.path().join("nope.toml");

    let result = with_override(Some(&missing), || load_for_workspace(root.path()));
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn no_file_means_defaults() {
    let root = tempdir().unwrap();
    let (config, path) = with_override(None, || load_for_workspace(root.path())).unwrap();
    assert_eq!(path, None);
    assert_eq!(config, CarveConfig::default());
}
