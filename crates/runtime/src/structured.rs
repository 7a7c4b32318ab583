//! Structured-output handling.
//!
//! Providers sometimes return structured fields whose values are
//! JSON-encoded strings. Responses are parsed recursively before schema
//! validation so the validator sees values, not strings. A residual
//! parse failure is a `json-parse-error`; a validation failure is a
//! `schema-validation-error` carrying the field-level messages.

use serde_json::Value;

use sr_domain::error::{Error, Result};
use sr_dsl::codegen::program::SchemaDecl;

/// Parse raw model output into JSON, tolerating a fenced code block
/// around the document.
pub fn parse_model_json(raw: &str) -> Result<Value> {
    let trimmed = strip_code_fence(raw.trim());
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| Error::JsonParse(format!("{e} in model output")))?;
    Ok(deep_parse(value))
}

/// Recursively re-parse JSON-string values nested inside a document.
pub fn deep_parse(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let t = s.trim_start();
            if t.starts_with('{') || t.starts_with('[') {
                match serde_json::from_str::<Value>(&s) {
                    Ok(parsed) => deep_parse(parsed),
                    Err(_) => Value::String(s),
                }
            } else {
                Value::String(s)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(deep_parse).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, deep_parse(v))).collect())
        }
        other => other,
    }
}

/// Validate parsed output against a declared schema.
pub fn validate_against(schema: &SchemaDecl, value: &Value) -> Result<()> {
    let errors = schema.validate(value);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::SchemaValidation(errors))
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sr_dsl::ast::TypeExpr;
    use sr_dsl::codegen::program::FieldDecl;

    #[test]
    fn deep_parse_unwraps_nested_json_strings() {
        let value = json!({
            "finding": "{\"title\": \"t\", \"tags\": \"[1, 2]\"}",
        });
        let parsed = deep_parse(value);
        assert_eq!(parsed["finding"]["title"], "t");
        assert_eq!(parsed["finding"]["tags"], json!([1, 2]));
    }

    #[test]
    fn non_json_strings_stay_strings() {
        let value = json!({"note": "{not json", "plain": "hello"});
        let parsed = deep_parse(value);
        assert_eq!(parsed["note"], "{not json");
        assert_eq!(parsed["plain"], "hello");
    }

    #[test]
    fn parse_model_json_handles_code_fences() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(parse_model_json(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn residual_parse_failure_is_json_parse_error() {
        let err = parse_model_json("definitely not json").unwrap_err();
        assert!(matches!(err, Error::JsonParse(_)));
        assert!(err.to_string().starts_with("json-parse-error"));
    }

    #[test]
    fn validation_failure_carries_field_messages() {
        let schema = SchemaDecl {
            name: "Finding".into(),
            fields: vec![FieldDecl { name: "title".into(), ty: TypeExpr::Str, optional: false }],
        };
        let err = validate_against(&schema, &json!({"title": 42})).unwrap_err();
        let Error::SchemaValidation(messages) = &err else {
            panic!("expected schema validation error");
        };
        assert!(messages[0].contains("title"));
        assert!(err.to_string().starts_with("schema-validation-error"));
    }

    #[test]
    fn deep_parsed_value_passes_validation_that_raw_would_fail() {
        let schema = SchemaDecl {
            name: "S".into(),
            fields: vec![FieldDecl {
                name: "tags".into(),
                ty: TypeExpr::List(Box::new(TypeExpr::Int)),
                optional: false,
            }],
        };
        let raw = json!({"tags": "[1, 2, 3]"});
        assert!(validate_against(&schema, &raw).is_err());
        assert!(validate_against(&schema, &deep_parse(raw)).is_ok());
    }
}
