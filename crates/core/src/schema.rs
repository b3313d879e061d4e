//! Tool input schemas.
//!
//! Input types derive [`JsonSchema`]; the generated schema is what the
//! provider sees and what raw model output is checked against before any
//! executor runs.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ValidationError;

/// JSON Schema for `T`, without the `$schema` key providers don't need.
pub fn schema_for<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}));
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
    }
    schema
}

/// Check `args` against `schema`, collecting every violation.
pub fn validate_against_schema(schema: &Value, args: &Value) -> Result<(), ValidationError> {
    let validator = jsonschema::Validator::new(schema)
        .map_err(|e| ValidationError::InvalidSchema(e.to_string()))?;
    if validator.is_valid(args) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
    Err(ValidationError::Rejected(errors.join("; ")))
}

/// Deserialize validated input into the tool's input type.
pub fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, ValidationError> {
    serde_json::from_value(input).map_err(|e| ValidationError::Rejected(e.to_string()))
}
