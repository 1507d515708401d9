use serde_json::Value;
use sha2::{Digest, Sha256};

/// Merge `overlay` onto `base`, overlay winning at the leaf level.
///
/// Objects merge key-by-key, arrays and scalars are replaced whole. The
/// result carries lexicographic key order, so identical inputs always render
/// byte-identically.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            let mut merged = b.clone();
            for (key, value) in o {
                let entry = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

/// Serialize `value` to canonical JSON (object keys sorted) and return its
/// SHA-256 hex digest. Used to log ClusterInstance drift cheaply.
pub fn canonical_hash<T: serde::Serialize>(value: &T) -> String {
    let v = serde_json::to_value(value).unwrap_or(Value::Null);
    let canonical = sort_json_keys(v);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

fn sort_json_keys(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_json_keys(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_wins_at_leaves() {
        let base = json!({
            "baseDomain": "example.com",
            "network": { "machineCidr": "10.0.0.0/24", "dualStack": false },
            "sshKeys": ["old"]
        });
        let overlay = json!({
            "network": { "dualStack": true },
            "sshKeys": ["new-1", "new-2"]
        });
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged["baseDomain"], "example.com");
        assert_eq!(merged["network"]["machineCidr"], "10.0.0.0/24");
        assert_eq!(merged["network"]["dualStack"], true);
        // Arrays are replaced, never concatenated.
        assert_eq!(merged["sshKeys"], json!(["new-1", "new-2"]));
    }

    #[test]
    fn merge_is_deterministic() {
        let base = json!({ "z": 1, "a": { "y": 2, "b": 3 } });
        let overlay = json!({ "m": 4 });
        let one = serde_json::to_vec(&deep_merge(&base, &overlay)).unwrap();
        let two = serde_json::to_vec(&deep_merge(&base, &overlay)).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn hash_ignores_input_key_order() {
        let a = json!({ "x": 1, "y": { "b": 2, "a": 3 } });
        let b = json!({ "y": { "a": 3, "b": 2 }, "x": 1 });
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }
}
