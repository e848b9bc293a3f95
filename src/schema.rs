//! JSON Schema adapter.
//!
//! Handlers describe their inputs with JSON-Schema-shaped values. This
//! module reads those descriptions: prompt argument metadata comes from
//! `properties`/`required`, completion-capable fields carry an
//! `x-completable: true` marker, and tool argument bags get a light
//! structural check before decoding.

use serde_json::Value;

use crate::protocol::PromptArgument;

/// Marker key advertising that a field has a completion provider
pub const COMPLETABLE_KEY: &str = "x-completable";

/// Derive a prompt argument list from an object schema.
///
/// Each entry of `properties` becomes one argument; `description` is read
/// from the property's sub-schema and `required` from the schema's
/// `required` array.
pub fn prompt_arguments(schema: &Value) -> Vec<PromptArgument> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let properties = match schema.get("properties").and_then(Value::as_object) {
        Some(props) => props,
        None => return Vec::new(),
    };

    let mut arguments: Vec<PromptArgument> = properties
        .iter()
        .map(|(name, prop)| PromptArgument {
            name: name.clone(),
            description: prop
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
            required: Some(required.contains(&name.as_str())),
        })
        .collect();

    // serde_json maps don't guarantee ordering
    arguments.sort_by(|a, b| a.name.cmp(&b.name));
    arguments
}

/// Property names whose sub-schema carries `x-completable: true`
pub fn completable_fields(schema: &Value) -> Vec<String> {
    let properties = match schema.get("properties").and_then(Value::as_object) {
        Some(props) => props,
        None => return Vec::new(),
    };

    let mut fields: Vec<String> = properties
        .iter()
        .filter(|(_, prop)| {
            prop.get(COMPLETABLE_KEY)
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
        .map(|(name, _)| name.clone())
        .collect();

    fields.sort();
    fields
}

/// The sub-schema of a named property, if present
pub fn field_schema<'a>(schema: &'a Value, name: &str) -> Option<&'a Value> {
    schema.get("properties")?.get(name)
}

/// Structurally validate an argument bag against an object schema.
///
/// Checks object shape, presence of required keys, and primitive type tags
/// of the supplied values. Returns the first problem found.
pub fn validate_arguments(schema: &Value, arguments: Option<&Value>) -> Result<(), String> {
    let empty = Value::Object(serde_json::Map::new());
    let args = arguments.unwrap_or(&empty);

    let args = args
        .as_object()
        .ok_or_else(|| "arguments must be an object".to_string())?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(key) {
                return Err(format!("missing required argument '{}'", key));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in args {
            let declared = match properties.get(name).and_then(|p| p.get("type")) {
                Some(Value::String(t)) => t.as_str(),
                _ => continue,
            };
            if !type_matches(declared, value) {
                return Err(format!(
                    "argument '{}' should be of type {}",
                    name, declared
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}
