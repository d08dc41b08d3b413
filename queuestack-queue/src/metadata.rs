//! Queue metadata with case-insensitive keys

use queuestack_core::QueueError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Name/value pairs attached to a queue.
///
/// Keys are lower-cased on insertion, so `NEW` and `new` name the same entry.
/// Values are stored as given. Iteration is ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.as_ref().to_lowercase(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        match self.0.keys().find(|k| k.is_empty() || k.contains(char::is_whitespace)) {
            Some(key) => Err(QueueError::invalid_argument(format!(
                "invalid metadata name {:?}",
                key
            ))),
            None => Ok(()),
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}

impl<K: AsRef<str>, V: Into<String>, const N: usize> From<[(K, V); N]> for Metadata {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_lower_cased() {
        let metadata = Metadata::from([("NEW", "VAL")]);

        assert_eq!(metadata.get("new"), Some("VAL"));
        assert_eq!(metadata.get("New"), Some("VAL"));
        assert_eq!(metadata.iter().collect::<Vec<_>>(), vec![("new", "VAL")]);
    }

    #[test]
    fn test_differently_cased_keys_collapse() {
        let mut metadata = Metadata::new();
        metadata.insert("Val1", "foo");
        let previous = metadata.insert("VAL1", "bar");

        assert_eq!(previous.as_deref(), Some("foo"));
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get("val1"), Some("bar"));
    }

    #[test]
    fn test_invalid_names() {
        assert!(Metadata::from([("", "x")]).validate().is_err());
        assert!(Metadata::from([("two words", "x")]).validate().is_err());
        assert!(Metadata::from([("val1", "two words")]).validate().is_ok());
    }
}
