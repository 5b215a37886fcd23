//! Structural descriptions of payload values.
//!
//! [`describe`] walks a JSON value and records what kind of data sits at
//! each position: every field of an object, and a sample element of an
//! array. The result is serializable and meant for diagnostics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a value at one position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

/// Structural description of a value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub kind: ShapeKind,
    /// Object fields, by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Shape>,
    /// Shape of the first element, for non-empty arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elem: Option<Box<Shape>>,
    /// Element or field count for arrays and objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
}

impl Shape {
    fn leaf(kind: ShapeKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
            elem: None,
            len: None,
        }
    }

    /// Maximum nesting depth below this shape (a leaf has depth 0).
    pub fn depth(&self) -> usize {
        let below_fields = self.fields.values().map(Shape::depth).max();
        let below_elem = self.elem.as_ref().map(|e| e.depth());
        match below_fields.max(below_elem) {
            Some(d) => d + 1,
            None => 0,
        }
    }
}

/// Build the shape of `value`.
pub fn describe(value: &Value) -> Shape {
    match value {
        Value::Null => Shape::leaf(ShapeKind::Null),
        Value::Bool(_) => Shape::leaf(ShapeKind::Bool),
        Value::Number(n) if n.is_f64() => Shape::leaf(ShapeKind::Float),
        Value::Number(_) => Shape::leaf(ShapeKind::Integer),
        Value::String(_) => Shape::leaf(ShapeKind::String),
        Value::Array(items) => Shape {
            kind: ShapeKind::Array,
            fields: BTreeMap::new(),
            elem: items.first().map(|first| Box::new(describe(first))),
            len: Some(items.len()),
        },
        Value::Object(map) => Shape {
            kind: ShapeKind::Object,
            fields: map.iter().map(|(k, v)| (k.clone(), describe(v))).collect(),
            elem: None,
            len: Some(map.len()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars() {
        assert_eq!(describe(&json!(42)).kind, ShapeKind::Integer);
        assert_eq!(describe(&json!(4.2)).kind, ShapeKind::Float);
        assert_eq!(describe(&json!("x")).kind, ShapeKind::String);
        assert_eq!(describe(&json!(true)).kind, ShapeKind::Bool);
        assert_eq!(describe(&Value::Null).kind, ShapeKind::Null);
    }

    #[test]
    fn nested_object() {
        let shape = describe(&json!({
            "id": 1,
            "person": {"name": "Ann", "age": 31},
            "tags": ["a", "b"]
        }));
        assert_eq!(shape.kind, ShapeKind::Object);
        assert_eq!(shape.len, Some(3));
        assert_eq!(shape.fields["person"].fields["name"].kind, ShapeKind::String);

        let tags = &shape.fields["tags"];
        assert_eq!(tags.len, Some(2));
        assert_eq!(tags.elem.as_ref().unwrap().kind, ShapeKind::String);
        assert_eq!(shape.depth(), 2);
    }

    #[test]
    fn empty_array_has_no_elem() {
        let shape = describe(&json!([]));
        assert!(shape.elem.is_none());
        assert_eq!(shape.len, Some(0));
        assert_eq!(shape.depth(), 0);
    }

    #[test]
    fn serializes_compactly() {
        let json = serde_json::to_value(describe(&json!({"a": [1]}))).unwrap();
        assert_eq!(
            json,
            json!({
                "kind": "object",
                "len": 1,
                "fields": {"a": {"kind": "array", "len": 1, "elem": {"kind": "integer"}}}
            })
        );
    }
}
