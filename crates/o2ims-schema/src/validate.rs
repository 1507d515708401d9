use serde_json::{Map, Value};

use crate::error::SchemaError;

/// Validate `params` against `schema` and return a copy with schema defaults
/// filled in.
///
/// The supported schema dialect is the subset template authors actually use:
/// `type` (object, array, string, integer, number, boolean, null),
/// `properties`, `required`, `additionalProperties`, `items`, `enum`,
/// `default`. Validation is strict: keys not named in `properties` are
/// rejected unless the schema sets `additionalProperties: true`. All
/// violations are collected before returning.
pub fn validate_and_default(schema: &Value, params: &Value) -> Result<Value, SchemaError> {
    let mut value = params.clone();
    let mut errors = Vec::new();
    check(schema, &mut value, "$", &mut errors);

    if errors.is_empty() {
        return Ok(value);
    }
    if errors.len() == 1 {
        return Err(errors.remove(0));
    }
    Err(SchemaError::Multiple(errors))
}

fn check(schema: &Value, value: &mut Value, path: &str, errors: &mut Vec<SchemaError>) {
    let Some(schema_obj) = schema.as_object() else {
        errors.push(SchemaError::InvalidSchema {
            path: path.to_string(),
            message: "schema node is not an object".to_string(),
        });
        return;
    };

    if let Some(expected) = schema_obj.get("type") {
        let Some(expected) = expected.as_str() else {
            errors.push(SchemaError::InvalidSchema {
                path: path.to_string(),
                message: "'type' is not a string".to_string(),
            });
            return;
        };
        if !type_matches(expected, value) {
            errors.push(SchemaError::TypeMismatch {
                path: path.to_string(),
                expected: expected.to_string(),
                found: type_name(value).to_string(),
            });
            return;
        }
    }

    if let Some(allowed) = schema_obj.get("enum") {
        match allowed.as_array() {
            Some(options) => {
                if !options.iter().any(|o| o == &*value) {
                    errors.push(SchemaError::NotInEnum { path: path.to_string() });
                }
            }
            None => errors.push(SchemaError::InvalidSchema {
                path: path.to_string(),
                message: "'enum' is not an array".to_string(),
            }),
        }
    }

    match value {
        Value::Object(map) => check_object(schema_obj, map, path, errors),
        Value::Array(items) => {
            if let Some(item_schema) = schema_obj.get("items") {
                for (i, item) in items.iter_mut().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    check(item_schema, item, &item_path, errors);
                }
            }
        }
        _ => {}
    }
}

fn check_object(
    schema: &Map<String, Value>,
    map: &mut Map<String, Value>,
    path: &str,
    errors: &mut Vec<SchemaError>,
) {
    let properties = match schema.get("properties") {
        Some(Value::Object(p)) => Some(p),
        Some(_) => {
            errors.push(SchemaError::InvalidSchema {
                path: path.to_string(),
                message: "'properties' is not an object".to_string(),
            });
            return;
        }
        None => None,
    };

    let additional_allowed = schema
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(properties) = properties {
        // Defaults first, so required checks see them.
        for (key, sub) in properties {
            if !map.contains_key(key) {
                if let Some(default) = sub.get("default") {
                    map.insert(key.clone(), default.clone());
                }
            }
        }

        if !additional_allowed {
            for key in map.keys() {
                if !properties.contains_key(key) {
                    errors.push(SchemaError::UnknownKey {
                        path: path.to_string(),
                        key: key.clone(),
                    });
                }
            }
        }

        for (key, sub) in properties {
            if let Some(v) = map.get_mut(key) {
                let sub_path = format!("{}.{}", path, key);
                check(sub, v, &sub_path, errors);
            }
        }
    }

    if let Some(required) = schema.get("required") {
        match required.as_array() {
            Some(keys) => {
                for key in keys {
                    let Some(key) = key.as_str() else {
                        errors.push(SchemaError::InvalidSchema {
                            path: path.to_string(),
                            message: "'required' entry is not a string".to_string(),
                        });
                        continue;
                    };
                    if !map.contains_key(key) {
                        errors.push(SchemaError::MissingRequired {
                            path: path.to_string(),
                            key: key.to_string(),
                        });
                    }
                }
            }
            None => errors.push(SchemaError::InvalidSchema {
                path: path.to_string(),
                message: "'required' is not an array".to_string(),
            }),
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
