use carve_config::{BodyForm, CarveConfig, ConfigWarning, Severity, StaticPreference};
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

#[test]
fn reports_unknown_keys_with_full_paths() {
    let text = r#"
typo = 1

[style.local_function_body]
valeu = "block"

[logging]
jsn = true
"#;

    let (_config, diagnostics) =
        CarveConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert_eq!(
        diagnostics.unknown_keys,
        vec!["logging.jsn", "style.local_function_body.valeu", "typo"]
    );
}

#[test]
fn reads_style_options_with_severities() {
    let text = r#"
[style.prefer_static_local_function]
value = "never"
severity = "warning"

[style.local_function_body]
value = "when_on_single_line"
"#;

    let (config, diagnostics) =
        CarveConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert!(diagnostics.is_empty());
    assert_eq!(
        config.style.prefer_static_local_function.value,
        StaticPreference::Never
    );
    assert_eq!(
        config.style.prefer_static_local_function.severity,
        Severity::Warning
    );
    assert_eq!(
        config.style.local_function_body.value,
        BodyForm::WhenOnSingleLine
    );
    assert_eq!(config.style.local_function_body.severity, Severity::Silent);
}

#[test]
fn invalid_logging_level_is_a_warning() {
    let text = r#"
[logging]
level = "carve=notalevel"
"#;

    let (_config, diagnostics) =
        CarveConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert_eq!(
        diagnostics.warnings,
        vec![ConfigWarning::LoggingLevelInvalid {
            value: "carve=notalevel".to_owned(),
            normalized: "carve=notalevel".to_owned(),
        }]
    );
}

#[test]
fn unknown_enum_values_are_errors() {
    let text = r#"
[style.implicit_typing]
value = "sometimes"
"#;

    assert!(CarveConfig::load_from_str_with_diagnostics(text).is_err());
}

#[test]
fn loads_from_a_file() {
    let file = NamedTempFile::new().expect("temp file");
    std::fs::write(
        file.path(),
        "[style.implicit_typing]\nvalue = \"always\"\n",
    )
    .expect("write config");

    let (config, diagnostics) =
        CarveConfig::load_from_path_with_diagnostics(file.path()).expect("config should load");
    assert!(diagnostics.is_empty());
    assert_eq!(
        config.style.implicit_typing.value,
        carve_config::ImplicitTyping::Always
    );
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = CarveConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, carve_config::ConfigError::Io { .. }));
}
