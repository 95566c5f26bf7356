use rust_mcp_schema::ToolInputSchema;
use serde_json::Value;

use crate::tools::{ParameterType, ToolParameter};

/// Maps a JSON Schema `type` onto one of the four host parameter types.
///
/// Anything that is not a recognised type string, including a missing type,
/// union types and `object`, becomes `String`.
pub fn classify_schema_type(schema_type: Option<&Value>) -> ParameterType {
    match schema_type.and_then(Value::as_str) {
        Some("number") | Some("integer") => ParameterType::Number,
        Some("boolean") => ParameterType::Boolean,
        Some("array") => ParameterType::Array,
        _ => ParameterType::String,
    }
}

/// Flattens the top-level properties of an input schema into parameters,
/// ordered by name.
///
/// Nested and item schemas are dropped; the full schema stays available on
/// the tool descriptor.
pub fn convert_parameters(schema: &ToolInputSchema) -> Vec<ToolParameter> {
    let mut parameters: Vec<ToolParameter> = schema
        .properties
        .iter()
        .flatten()
        .map(|(name, property)| ToolParameter {
            name: name.clone(),
            kind: classify_schema_type(property.get("type")),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            required: schema.required.iter().any(|required| required == name),
        })
        .collect();
    parameters.sort_by(|a, b| a.name.cmp(&b.name));
    parameters
}
