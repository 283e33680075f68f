//! Raw records as produced by datasources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field map of a record or graph node, keyed by (dotted) field path.
///
/// `serde_json::Map` keeps keys sorted unless some crate in the build
/// enables serde_json's `preserve_order` feature, so code that needs a
/// stable order (content hashing) sorts explicitly.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// One raw result returned by a datasource search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Backend-specific identifier (document id, tweet id, ...).
    pub id: String,
    /// Field values of the record.
    #[serde(default)]
    pub fields: Fields,
    /// Highlighted fragments per field, if the backend provides them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub highlight: BTreeMap<String, Vec<String>>,
}

impl Record {
    /// Creates a record without highlights.
    #[must_use]
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            highlight: BTreeMap::new(),
        }
    }
}

/// A field advertised by datasource introspection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Field {
    /// Dotted field path, e.g. `user.screen_name`.
    pub path: String,
    /// Backend type name of the field.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Field {
    /// Creates a field descriptor.
    #[must_use]
    pub fn new(path: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: kind.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_without_highlight_omits_key() {
        let mut fields = Fields::new();
        fields.insert("user".into(), json!("alice"));
        let record = Record::new("1", fields);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "1");
        assert_eq!(value["fields"]["user"], "alice");
        assert!(value.get("highlight").is_none());
    }

    #[test]
    fn test_record_deserialize_defaults() {
        let record: Record = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert!(record.fields.is_empty());
        assert!(record.highlight.is_empty());
    }

    #[test]
    fn test_field_type_key() {
        let field = Field::new("user.name", "string");
        let value = serde_json::to_value(&field).unwrap();
        assert_eq!(value, json!({"path": "user.name", "type": "string"}));
    }
}
