//! Deserializers that drop malformed input instead of rejecting the request.
//!
//! Used with `#[serde(default, deserialize_with = "...")]` so a missing field,
//! a `null`, a non-array, or a single bad element never fails the whole body.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A sequence where invalid elements are skipped. Non-arrays become empty.
pub fn seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(valid_elements(value))
}

/// Like [`seq`], but absent/null/non-array input stays `None`.
pub fn opt_seq<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_array() {
        Ok(Some(valid_elements(value)))
    } else {
        Ok(None)
    }
}

/// An optional value that becomes `None` when it does not parse.
pub fn opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::debug!(error = %e, "Dropping unparseable field");
            Ok(None)
        }
    }
}

/// The elements of a JSON array that parse as `T`. Non-arrays yield nothing.
pub fn valid_elements<T: DeserializeOwned>(value: Value) -> Vec<T> {
    let Value::Array(items) = value else {
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed element");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Item {
        name: String,
    }

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "seq")]
        items: Vec<Item>,
        #[serde(default, deserialize_with = "opt_seq")]
        maybe: Option<Vec<Item>>,
        #[serde(default, deserialize_with = "opt")]
        single: Option<Item>,
    }

    #[test]
    fn test_skips_bad_elements() {
        let h: Holder = serde_json::from_str(
            r#"{"items":[{"name":"a"},{"nope":1},"x",{"name":"b"}],"maybe":[{"bad":true}],"single":{"name":5}}"#,
        )
        .unwrap();
        let names: Vec<_> = h.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(h.maybe.map(|m| m.len()), Some(0));
        assert!(h.single.is_none());
    }

    #[test]
    fn test_non_array_and_missing() {
        let h: Holder = serde_json::from_str(r#"{"items":"oops","maybe":{}}"#).unwrap();
        assert!(h.items.is_empty());
        assert!(h.maybe.is_none());

        let h: Holder = serde_json::from_str("{}").unwrap();
        assert!(h.items.is_empty());
        assert!(h.single.is_none());
    }
}
