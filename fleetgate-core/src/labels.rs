//! Label maps attached to tokens and propagated to the clusters they admit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MAX_LABELS: usize = 64;
pub const MAX_KEY_LEN: usize = 63;
pub const MAX_VALUE_LEN: usize = 63;

/// Validated string-to-string labels.
///
/// Keys: 1..=63 chars of `[A-Za-z0-9._/-]`, starting with an alphanumeric.
/// Values: 0..=63 chars of `[A-Za-z0-9._-]`.
/// Ordering is irrelevant to equality; a BTreeMap keeps serialization deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Validate and wrap a label map.
    pub fn new<I, K, V>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        if map.len() > MAX_LABELS {
            return Err(ValidationError::TooManyLabels {
                count: map.len(),
                max: MAX_LABELS,
            });
        }
        for (key, value) in &map {
            validate_key(key)?;
            validate_value(key, value)?;
        }
        Ok(Self(map))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

fn validate_key(key: &str) -> Result<(), ValidationError> {
    let err = |reason| ValidationError::InvalidLabelKey {
        key: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(err("must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(err("longer than 63 characters"));
    }
    if !key.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(err("must start with a letter or digit"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
    {
        return Err(err("contains characters outside [A-Za-z0-9._/-]"));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), ValidationError> {
    let err = |reason| ValidationError::InvalidLabelValue {
        key: key.to_string(),
        reason,
    };
    if value.len() > MAX_VALUE_LEN {
        return Err(err("longer than 63 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(err("contains characters outside [A-Za-z0-9._-]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_labels() {
        let labels = Labels::new([
            ("env", "prod"),
            ("fleet.example.io/region", "eu-west-1"),
            ("empty", ""),
        ])
        .unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get("env"), Some("prod"));
    }

    #[test]
    fn order_is_irrelevant() {
        let a = Labels::new([("a", "1"), ("b", "2")]).unwrap();
        let b = Labels::new([("b", "2"), ("a", "1")]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_keys() {
        for key in ["", "-leading", "has space", &"k".repeat(64)] {
            assert!(
                matches!(
                    Labels::new([(key, "v")]),
                    Err(ValidationError::InvalidLabelKey { .. })
                ),
                "key {key:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Labels::new([("k", "a/b")]),
            Err(ValidationError::InvalidLabelValue { .. })
        ));
        assert!(matches!(
            Labels::new([("k", "v".repeat(64))]),
            Err(ValidationError::InvalidLabelValue { .. })
        ));
    }

    #[test]
    fn rejects_too_many() {
        let pairs = (0..=MAX_LABELS).map(|i| (format!("k{i}"), "v".to_string()));
        assert!(matches!(
            Labels::new(pairs),
            Err(ValidationError::TooManyLabels { count: 65, max: 64 })
        ));
    }

    #[test]
    fn serializes_as_plain_map() {
        let labels = Labels::new([("b", "2"), ("a", "1")]).unwrap();
        let json = serde_json::to_string(&labels).unwrap();
        assert_eq!(json, r#"{"a":"1","b":"2"}"#);
    }
}
