//! Shallow structural comparison of JSON objects.
//!
//! Two objects match when they carry exactly the same keys and every common
//! key holds an equal value. Nested objects are compared as whole values and
//! are never diffed key by key, so a payload with an extra volatile field only
//! matches once the caller has stripped that field (see
//! [`MatchExpectation::ignoring`]).

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

pub type Object = Map<String, Value>;

/// Key-level difference between an `expected` and an `actual` object.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ObjectDiff<'a> {
    /// Keys only present in `expected`.
    pub missing: BTreeMap<&'a str, &'a Value>,
    /// Keys only present in `actual`.
    pub extra: BTreeMap<&'a str, &'a Value>,
    /// Common keys whose values are equal.
    pub equal: BTreeMap<&'a str, &'a Value>,
    /// Common keys whose values differ, as `(expected, actual)`.
    pub changed: BTreeMap<&'a str, (&'a Value, &'a Value)>,
}

impl ObjectDiff<'_> {
    #[must_use]
    pub fn is_match(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.changed.is_empty()
    }
}

/// Splits `lhs` into the entries whose key is absent from `rhs` and the ones
/// whose key is present.
#[must_use]
pub fn subtract<'a>(
    lhs: &'a Object,
    rhs: &Object,
) -> (BTreeMap<&'a str, &'a Value>, BTreeMap<&'a str, &'a Value>) {
    lhs.iter()
        .map(|(key, value)| (key.as_str(), value))
        .partition(|(key, _)| !rhs.contains_key(*key))
}

#[must_use]
pub fn diff<'a>(expected: &'a Object, actual: &'a Object) -> ObjectDiff<'a> {
    let (missing, common) = subtract(expected, actual);
    let (extra, _) = subtract(actual, expected);

    let mut equal = BTreeMap::new();
    let mut changed = BTreeMap::new();
    for (key, expected_value) in common {
        let actual_value = &actual[key];
        if expected_value == actual_value {
            equal.insert(key, expected_value);
        } else {
            changed.insert(key, (expected_value, actual_value));
        }
    }

    ObjectDiff {
        missing,
        extra,
        equal,
        changed,
    }
}

#[must_use]
pub fn matches(expected: &Object, actual: &Object) -> bool {
    diff(expected, actual).is_match()
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("payload mismatch: missing {missing:?}, extra {extra:?}, changed {changed:?}")]
pub struct PayloadMismatch {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub changed: Vec<String>,
    pub received: Value,
}

/// Expected payload plus the volatile keys removed from a received payload
/// before comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchExpectation {
    expected: Object,
    ignored: BTreeSet<String>,
}

impl MatchExpectation {
    #[must_use]
    pub fn new(expected: Object) -> Self {
        Self {
            expected,
            ignored: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn ignoring<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.ignored.extend(keys.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub const fn expected(&self) -> &Object {
        &self.expected
    }

    pub fn check(&self, received: &Value) -> Result<(), PayloadMismatch> {
        let Value::Object(received_object) = received else {
            return Err(PayloadMismatch {
                missing: self.expected.keys().cloned().collect(),
                extra: Vec::new(),
                changed: Vec::new(),
                received: received.clone(),
            });
        };

        let stripped: Object = received_object
            .iter()
            .filter(|(key, _)| !self.ignored.contains(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let difference = diff(&self.expected, &stripped);
        if difference.is_match() {
            return Ok(());
        }

        Err(PayloadMismatch {
            missing: difference.missing.keys().map(|&key| key.to_owned()).collect(),
            extra: difference.extra.keys().map(|&key| key.to_owned()).collect(),
            changed: difference.changed.keys().map(|&key| key.to_owned()).collect(),
            received: received.clone(),
        })
    }
}
