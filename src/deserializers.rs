//! Forgiving deserializers for problem records.
//!
//! Records arrive from a flat file or over HTTP and are frequently partial:
//! lists may be missing or `null`, text fields may be numbers, and type tags
//! may be misspelled. These helpers turn every such shape into a documented
//! default so downstream code never has to guess.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Deserializes a list, treating `null` or a non-array as empty.
///
/// Items that cannot be decoded are dropped with a debug log instead of
/// failing the whole record.
///
/// # Examples
///
/// ```json
/// { "causes": null }              // -> []
/// { "causes": "n/a" }             // -> []
/// { "causes": [{"description": "x"}, 7] }   // -> [Cause { description: "x", .. }]
/// ```
pub fn de_vec_forgiving<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(items)) = value else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<T>(item) {
            Ok(v) => out.push(v),
            Err(e) => tracing::debug!("dropping undecodable list item: {}", e),
        }
    }
    Ok(out)
}

/// Deserializes text permissively: `null` becomes empty, scalars are stringified.
pub fn de_string_forgiving<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    })
}

/// Deserializes an optional identifier, accepting strings and integers.
pub fn de_option_string_forgiving<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(_) => None,
    })
}

/// Deserializes a type tag into an enum. Tags must match the enum's
/// `snake_case` names exactly.
///
/// Missing or `null` yields `None`; a non-string, differently cased or
/// unknown string yields whatever the enum's `#[serde(other)]` variant
/// decodes to.
pub fn de_option_kind<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let tag = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    };
    Ok(serde_json::from_value::<T>(Value::String(tag)).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "snake_case")]
    enum Tag {
        Alpha,
        #[serde(other)]
        Other,
    }

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "de_vec_forgiving")]
        items: Vec<u32>,
        #[serde(default, deserialize_with = "de_string_forgiving")]
        text: String,
        #[serde(default, deserialize_with = "de_option_kind")]
        tag: Option<Tag>,
    }

    #[test]
    fn null_and_missing_lists_are_empty() {
        let p: Probe = serde_json::from_str(r#"{"items": null}"#).unwrap();
        assert!(p.items.is_empty());
        let p: Probe = serde_json::from_str(r#"{}"#).unwrap();
        assert!(p.items.is_empty());
        let p: Probe = serde_json::from_str(r#"{"items": "nope"}"#).unwrap();
        assert!(p.items.is_empty());
    }

    #[test]
    fn undecodable_items_are_dropped() {
        let p: Probe = serde_json::from_str(r#"{"items": [1, "x", 3]}"#).unwrap();
        assert_eq!(p.items, vec![1, 3]);
    }

    #[test]
    fn scalars_become_text() {
        let p: Probe = serde_json::from_str(r#"{"text": 42}"#).unwrap();
        assert_eq!(p.text, "42");
        let p: Probe = serde_json::from_str(r#"{"text": null}"#).unwrap();
        assert_eq!(p.text, "");
    }

    #[test]
    fn kind_tags_match_exactly_with_fallback() {
        let p: Probe = serde_json::from_str(r#"{"tag": "alpha"}"#).unwrap();
        assert_eq!(p.tag, Some(Tag::Alpha));
        for raw in [r#"{"tag": "ALPHA"}"#, r#"{"tag": "Alpha"}"#, r#"{"tag": " alpha"}"#, r#"{"tag": "beta"}"#, r#"{"tag": 7}"#] {
            let p: Probe = serde_json::from_str(raw).unwrap();
            assert_eq!(p.tag, Some(Tag::Other), "{raw}");
        }
        let p: Probe = serde_json::from_str(r#"{"tag": null}"#).unwrap();
        assert_eq!(p.tag, None);
    }
}
