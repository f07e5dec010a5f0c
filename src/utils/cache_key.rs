//! Deterministic cache keys built from a base key and request parameters.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Builds a cache key from a base key and a parameter object.
///
/// Top-level parameter names are sorted before serialization, so the same
/// parameter set produces the same key whatever order it was built in.
/// Parameters that serialize to nothing (or to an empty object) yield the
/// base key unchanged.
pub fn create_cache_key<P>(base_key: &str, params: &P) -> String
where
    P: Serialize + ?Sized,
{
    let value = match serde_json::to_value(params) {
        Ok(value) => value,
        Err(_) => return base_key.to_string(),
    };

    match value {
        Value::Null => base_key.to_string(),
        Value::Object(map) if map.is_empty() => base_key.to_string(),
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            match serde_json::to_string(&sorted) {
                Ok(json) => format!("{}:{}", base_key, json),
                Err(_) => base_key.to_string(),
            }
        }
        other => format!("{}:{}", base_key, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_order_independent() {
        let a = create_cache_key("leads", &json!({"b": 2, "a": 1}));
        let b = create_cache_key("leads", &json!({"a": 1, "b": 2}));
        assert_eq!(a, b);
        assert_eq!(a, r#"leads:{"a":1,"b":2}"#);
    }

    #[test]
    fn test_key_from_struct() {
        #[derive(Serialize)]
        struct Params {
            page: u32,
            workspace_id: &'static str,
        }

        let key = create_cache_key(
            "members",
            &Params {
                workspace_id: "42",
                page: 1,
            },
        );
        assert_eq!(key, r#"members:{"page":1,"workspace_id":"42"}"#);
    }

    #[test]
    fn test_empty_params_keep_base() {
        assert_eq!(create_cache_key("tags", &json!({})), "tags");
        assert_eq!(create_cache_key("tags", &Value::Null), "tags");
    }

    #[test]
    fn test_scalar_params() {
        assert_eq!(create_cache_key("lead", &7), "lead:7");
    }
}
