//! Stored access policies (queue ACL entries)

use chrono::{DateTime, Utc};
use queuestack_core::QueueError;
use std::collections::BTreeMap;

use crate::permissions::QueuePermissions;

/// Maximum number of signed identifiers a queue may hold
pub const MAX_SIGNED_IDENTIFIERS: usize = 5;

/// Maximum length of a signed identifier
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// A named, server-held grant that tokens can reference by identifier.
///
/// Every field is optional; a token referencing the policy supplies whatever
/// the policy leaves out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub start: Option<DateTime<Utc>>,
    pub expiry: Option<DateTime<Utc>>,
    pub permission: Option<QueuePermissions>,
}

impl AccessPolicy {
    pub fn new(permission: QueuePermissions, expiry: DateTime<Utc>) -> Self {
        Self {
            start: None,
            expiry: Some(expiry),
            permission: Some(permission),
        }
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }
}

/// Identifier -> policy map attached to a queue
pub type SignedIdentifiers = BTreeMap<String, AccessPolicy>;

/// Resolves stored access policies at authorization time
pub trait PolicyLookup {
    fn access_policy(&self, queue: &str, identifier: &str) -> Option<AccessPolicy>;
}

/// Check the size limits of an ACL before it is stored
pub fn validate_identifiers(identifiers: &SignedIdentifiers) -> Result<(), QueueError> {
    if identifiers.len() > MAX_SIGNED_IDENTIFIERS {
        return Err(QueueError::invalid_argument(format!(
            "at most {} signed identifiers are allowed, got {}",
            MAX_SIGNED_IDENTIFIERS,
            identifiers.len()
        )));
    }

    for id in identifiers.keys() {
        if id.is_empty() || id.len() > MAX_IDENTIFIER_LEN {
            return Err(QueueError::invalid_argument(format!(
                "signed identifier must be 1-{} characters: {:?}",
                MAX_IDENTIFIER_LEN, id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_too_many_identifiers() {
        let expiry = Utc::now() + Duration::hours(1);
        let identifiers: SignedIdentifiers = (0..6)
            .map(|i| (format!("id{}", i), AccessPolicy::new(QueuePermissions::READ, expiry)))
            .collect();

        let result = validate_identifiers(&identifiers);
        assert!(matches!(result, Err(QueueError::InvalidArgument(_))));
    }

    #[test]
    fn test_identifier_length() {
        let mut identifiers = SignedIdentifiers::new();
        identifiers.insert("x".repeat(65), AccessPolicy::default());
        assert!(validate_identifiers(&identifiers).is_err());

        identifiers.clear();
        identifiers.insert("x".repeat(64), AccessPolicy::default());
        assert!(validate_identifiers(&identifiers).is_ok());
    }
}
