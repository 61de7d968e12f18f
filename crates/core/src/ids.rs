//! Identifier normalization.
//!
//! The backend is inconsistent about how it references entities: the same
//! user may arrive as a bare string, as a populated object carrying `_id`,
//! or as an extended-JSON `{"$oid": ...}` wrapper. [`IdRef`] accepts every
//! one of those shapes and [`normalize`] collapses them into one comparable
//! string. Domain types only ever store the normalized form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Keys tried, in order, when an identifier arrives as an object.
const ID_KEYS: &[&str] = &["_id", "id", "$oid"];

/// Any wire representation of an entity identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum IdRef {
    /// `null`, a missing field, or an object without an id.
    #[default]
    Null,
    /// A plain string id.
    Text(String),
    /// A numeric id.
    Number(serde_json::Number),
    /// An object reference; holds the id extracted from it.
    Object(Box<IdRef>),
}

impl IdRef {
    /// Build an identifier from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => IdRef::Null,
            Value::String(s) => IdRef::Text(s),
            Value::Number(n) => IdRef::Number(n),
            Value::Bool(b) => IdRef::Text(b.to_string()),
            Value::Object(mut map) => ID_KEYS
                .iter()
                .find_map(|key| map.remove(*key))
                .map(|inner| IdRef::Object(Box::new(IdRef::from_value(inner))))
                .unwrap_or(IdRef::Null),
            Value::Array(_) => IdRef::Null,
        }
    }

    /// The canonical string form of this identifier.
    pub fn normalized(&self) -> String {
        match self {
            IdRef::Null => String::new(),
            IdRef::Text(s) => s.trim().to_string(),
            IdRef::Number(n) => n.to_string(),
            IdRef::Object(inner) => inner.normalized(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized().is_empty()
    }
}

/// Canonicalize any identifier representation. `normalize(&IdRef::Null)`
/// is the empty string.
pub fn normalize(id: &IdRef) -> String {
    id.normalized()
}

/// Normalize an optional identifier, treating absence like `null`.
pub fn normalize_opt(id: Option<&IdRef>) -> String {
    id.map(IdRef::normalized).unwrap_or_default()
}

/// Compare two identifiers by their normalized form. Empty ids never match.
pub fn same_id(a: &str, b: &str) -> bool {
    !a.is_empty() && a == b
}

impl From<&str> for IdRef {
    fn from(s: &str) -> Self {
        IdRef::Text(s.to_string())
    }
}

impl From<String> for IdRef {
    fn from(s: String) -> Self {
        IdRef::Text(s)
    }
}

impl From<Option<String>> for IdRef {
    fn from(s: Option<String>) -> Self {
        s.map(IdRef::Text).unwrap_or(IdRef::Null)
    }
}

impl<'de> Deserialize<'de> for IdRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(IdRef::from_value(Value::deserialize(deserializer)?))
    }
}

impl Serialize for IdRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let normalized = self.normalized();
        if normalized.is_empty() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&normalized)
        }
    }
}

impl std::fmt::Display for IdRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> IdRef {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn null_and_missing_normalize_to_empty() {
        assert_eq!(normalize(&IdRef::Null), "");
        assert_eq!(normalize(&parse(json!(null))), "");
        assert_eq!(normalize_opt(None), "");
    }

    #[test]
    fn every_shape_of_the_same_entity_normalizes_equal() {
        let shapes = [
            json!("65f0c0ffee"),
            json!({ "_id": "65f0c0ffee" }),
            json!({ "id": "65f0c0ffee", "fullName": "Ada" }),
            json!({ "_id": { "$oid": "65f0c0ffee" } }),
            json!({ "$oid": "65f0c0ffee" }),
        ];
        let normalized: Vec<String> = shapes.into_iter().map(|v| normalize(&parse(v))).collect();
        assert!(normalized.iter().all(|n| n == "65f0c0ffee"), "{normalized:?}");
    }

    #[test]
    fn prefers_underscore_id_over_virtual_id() {
        let id = parse(json!({ "_id": "a", "id": "b" }));
        assert_eq!(id.normalized(), "a");
    }

    #[test]
    fn numeric_ids_normalize_like_their_string_form() {
        assert_eq!(normalize(&parse(json!(42))), normalize(&IdRef::from("42")));
    }

    #[test]
    fn object_without_id_is_empty() {
        assert!(parse(json!({ "fullName": "Ada" })).is_empty());
        assert!(parse(json!([1, 2])).is_empty());
    }

    #[test]
    fn serializes_as_normalized_string() {
        let id = parse(json!({ "_id": "abc" }));
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("abc"));
        assert_eq!(serde_json::to_value(IdRef::Null).unwrap(), json!(null));
    }

    #[test]
    fn empty_ids_never_match() {
        assert!(!same_id("", ""));
        assert!(same_id("m1", "m1"));
        assert!(!same_id("m1", "m2"));
    }
}
