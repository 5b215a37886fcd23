//! Payload helpers.
//!
//! Stored objects are generic JSON values whose top level must be a map.
//! Scalars and arrays are rejected at the store boundary.

use serde_json::{Map, Value};

use crate::error::TypeError;

/// The map-shaped payload stored under every version.
pub type Object = Map<String, Value>;

/// Human-readable name of a value's top-level kind.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Unwrap a value into an [`Object`], rejecting every other kind.
pub fn require_object(value: Value) -> Result<Object, TypeError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(TypeError::NotAnObject {
            found: value_kind(&other),
        }),
    }
}
