use carve_config::json_schema;
use insta::assert_json_snapshot;

#[test]
fn json_schema_describes_body_form_values() {
    let schema = json_schema();
    let value = serde_json::to_value(schema).expect("schema serializes");

    let body_form = value
        .pointer("/definitions/BodyForm")
        .expect("BodyForm definition exists");
    assert_json_snapshot!(body_form, @r###"
    {
      "description": "Body form of the extracted local function.",
      "enum": [
        "block",
        "when_possible",
        "when_on_single_line"
      ],
      "type": "string"
    }
    "###);
}

#[test]
fn json_schema_rejects_unknown_top_level_keys() {
    let value = serde_json::to_value(json_schema()).expect("schema serializes");
    assert_eq!(
        value.get("additionalProperties").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert!(value.pointer("/properties/style").is_some());
    assert!(value.pointer("/properties/logging").is_some());
}
