use schemars::schema::RootSchema;
use schemars::schema_for;

use crate::CarveConfig;

/// JSON schema for `carve.toml`, for editor tooling and CI validation.
#[must_use]
pub fn json_schema() -> RootSchema {
    let mut schema = schema_for!(CarveConfig);
    if let Some(metadata) = schema.schema.metadata.as_mut() {
        metadata.title = Some("carve.toml".to_owned());
    }
    schema
}
