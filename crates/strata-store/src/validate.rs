//! Validate-on-write hook.
//!
//! When a write requests validation, or the key's record has its `check`
//! flag set, the store asks its [`PayloadValidator`] for a [`Verdict`]
//! before anything is written. A rejection aborts the write with
//! [`StoreError::ValidationRejected`](crate::StoreError::ValidationRejected).

use strata_types::Object;

/// Outcome of validating one payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject { reason: String },
}

impl Verdict {
    /// Reject with a human-readable reason.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`Verdict::Pass`].
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// A pass/fail check run before a payload is written.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, key: &str, schema_key: &str, object: &Object) -> Verdict;
}

/// Validator that passes every payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl PayloadValidator for AcceptAll {
    fn validate(&self, _key: &str, _schema_key: &str, _object: &Object) -> Verdict {
        Verdict::Pass
    }
}

impl<F> PayloadValidator for F
where
    F: Fn(&str, &str, &Object) -> Verdict + Send + Sync,
{
    fn validate(&self, key: &str, schema_key: &str, object: &Object) -> Verdict {
        self(key, schema_key, object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> Object {
        strata_types::require_object(value).unwrap()
    }

    #[test]
    fn accept_all_passes() {
        assert!(AcceptAll.validate("k", "k", &obj(json!({}))).is_pass());
    }

    #[test]
    fn closures_are_validators() {
        let needs_name = |_: &str, _: &str, o: &Object| {
            if o.contains_key("name") {
                Verdict::Pass
            } else {
                Verdict::reject("missing name")
            }
        };
        assert!(needs_name.validate("k", "k", &obj(json!({"name": "Ann"}))).is_pass());
        assert_eq!(
            needs_name.validate("k", "k", &obj(json!({"age": 3}))),
            Verdict::reject("missing name")
        );
    }
}
