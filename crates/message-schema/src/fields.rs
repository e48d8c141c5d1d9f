use serde_json::{Map, Value};

use crate::SchemaError;

/// Field key to field value mapping carried by a data response.
pub type FieldValues = Map<String, Value>;

/// Parse operator-supplied JSON into field values.
///
/// Accepted shapes:
/// - an object: `{"formkey": "formValue"}`
/// - the template list: `[{"key": "formkey", "value": "formValue"}]`
/// - a list of single-entry objects: `[{"formkey": "formValue"}]`
pub fn parse_field_values(raw: &str) -> Result<FieldValues, SchemaError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| SchemaError::InvalidFieldValues(err.to_string()))?;

    match value {
        Value::Object(map) => Ok(map),
        Value::Array(entries) => {
            let mut fields = FieldValues::new();
            for (idx, entry) in entries.into_iter().enumerate() {
                let Value::Object(mut entry) = entry else {
                    return Err(SchemaError::InvalidFieldValues(format!(
                        "entry {idx} is not an object"
                    )));
                };
                if is_template_entry(&entry) {
                    let key = match entry.remove("key") {
                        Some(Value::String(key)) => key,
                        _ => {
                            return Err(SchemaError::InvalidFieldValues(format!(
                                "entry {idx} has a non-string key"
                            )))
                        }
                    };
                    let value = entry.remove("value").unwrap_or(Value::Null);
                    fields.insert(key, value);
                } else if entry.len() == 1 {
                    fields.extend(entry);
                } else {
                    return Err(SchemaError::InvalidFieldValues(format!(
                        "entry {idx} must be {{\"key\", \"value\"}} or a single field"
                    )));
                }
            }
            Ok(fields)
        }
        other => Err(SchemaError::InvalidFieldValues(format!(
            "expected an object or a list, found {}",
            kind(&other)
        ))),
    }
}

fn is_template_entry(entry: &Map<String, Value>) -> bool {
    entry.len() == 2 && entry.contains_key("key") && entry.contains_key("value")
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
