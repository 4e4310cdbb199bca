use std::collections::BTreeSet;

use serde::de::DeserializeOwned;

/// Diagnostics produced while loading a `carve.toml`.
///
/// Loading is best effort: callers always get a [`crate::CarveConfig`] when deserialization
/// succeeds, plus whatever was noticed along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiagnostics {
    /// Keys present in the input that the schema does not know, as dotted TOML paths
    /// (for example `style.implicit_typing.valeu`).
    pub unknown_keys: Vec<String>,
    /// Recoverable problems with known keys.
    pub warnings: Vec<ConfigWarning>,
}

impl ConfigDiagnostics {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unknown_keys.is_empty() && self.warnings.is_empty()
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `logging.level` is not a level and not a valid filter directive; `info` is used instead.
    LoggingLevelInvalid { value: String, normalized: String },
}

/// Deserializes `text`, collecting every key the target type ignored.
pub(crate) fn deserialize_toml_with_unknown_keys<T: DeserializeOwned>(
    text: &str,
) -> Result<(T, Vec<String>), toml::de::Error> {
    let mut unknown = BTreeSet::new();
    let value = serde_ignored::deserialize(toml::de::Deserializer::new(text), |path| {
        unknown.insert(toml_path(&path));
    })?;
    Ok((value, unknown.into_iter().collect()))
}

/// Renders an ignored path as TOML users write it: `style.body` or `rules[0].name`.
fn toml_path(path: &serde_ignored::Path<'_>) -> String {
    let rendered = path.to_string();
    let mut out = String::with_capacity(rendered.len());
    for segment in rendered.split('.').filter(|segment| !segment.is_empty()) {
        if !out.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            out.push_str(&format!("[{segment}]"));
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(segment);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Presets {
        #[allow(dead_code)]
        preset: Vec<Preset>,
    }

    #[derive(Debug, Deserialize)]
    struct Preset {
        #[allow(dead_code)]
        base_name: String,
    }

    #[test]
    fn array_elements_render_with_indexes() {
        let text = r#"
[[preset]]
base_name = "Compute"

[[preset]]
base_name = "Load"
prefix = "Get"
"#;
        let (_presets, unknown) = deserialize_toml_with_unknown_keys::<Presets>(text).unwrap();
        assert_eq!(unknown, vec!["preset[1].prefix"]);
    }

    #[test]
    fn repeated_unknown_keys_are_reported_once() {
        let text = "[[preset]]\nbase_name = \"A\"\nextra = 1\n\n[[preset]]\nbase_name = \"B\"\n";
        let (_presets, unknown) = deserialize_toml_with_unknown_keys::<Presets>(text).unwrap();
        assert_eq!(unknown, vec!["preset[0].extra"]);
    }
}
