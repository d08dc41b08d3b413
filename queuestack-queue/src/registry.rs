//! Queue registry: name-indexed queues with their metadata and ACLs

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard, RwLock};
use queuestack_auth::{validate_identifiers, AccessPolicy, PolicyLookup, SignedIdentifiers};
use queuestack_core::QueueError;
use regex::Regex;
use std::sync::Arc;
use tracing::info;

use crate::metadata::Metadata;
use crate::store::MessageStore;

static QUEUE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("queue name pattern is valid"));

/// Check a queue name: 3-63 lower-case letters, digits and single hyphens,
/// starting and ending with a letter or digit.
pub fn validate_queue_name(name: &str) -> Result<(), QueueError> {
    if !(3..=63).contains(&name.len()) || !QUEUE_NAME.is_match(name) {
        return Err(QueueError::invalid_argument(format!(
            "invalid queue name {:?}",
            name
        )));
    }
    Ok(())
}

/// A live queue
#[derive(Debug)]
pub struct Queue {
    pub name: String,
    pub created_at: DateTime<Utc>,
    metadata: RwLock<Metadata>,
    identifiers: RwLock<SignedIdentifiers>,
    messages: Mutex<MessageStore>,
}

impl Queue {
    fn new(name: &str, metadata: Metadata, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            created_at: now,
            metadata: RwLock::new(metadata),
            identifiers: RwLock::new(SignedIdentifiers::new()),
            messages: Mutex::new(MessageStore::new(name)),
        }
    }

    /// Lock the message store. Every message operation runs under this lock.
    pub fn messages(&self) -> MutexGuard<'_, MessageStore> {
        self.messages.lock()
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata.read().clone()
    }

    pub fn identifiers(&self) -> SignedIdentifiers {
        self.identifiers.read().clone()
    }
}

/// One entry of a queue listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    /// Present when the listing was asked to include metadata
    pub metadata: Option<Metadata>,
}

/// Queues in name order, as they were when the listing was taken
#[derive(Debug)]
pub struct QueueListing {
    entries: std::vec::IntoIter<QueueInfo>,
}

impl Iterator for QueueListing {
    type Item = QueueInfo;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for QueueListing {}

/// All queues of one service instance
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: DashMap<String, Arc<Queue>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue. Returns `false` if it already existed and
    /// `fail_on_exist` is not set.
    pub fn create(
        &self,
        name: &str,
        metadata: Metadata,
        fail_on_exist: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        validate_queue_name(name)?;
        metadata.validate()?;

        match self.queues.entry(name.to_string()) {
            Entry::Occupied(_) if fail_on_exist => {
                Err(QueueError::QueueAlreadyExists(name.to_string()))
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                info!(name = %name, "Creating queue");
                entry.insert(Arc::new(Queue::new(name, metadata, now)));
                Ok(true)
            }
        }
    }

    /// Delete a queue and everything in it. Returns `false` if it did not
    /// exist and `fail_not_exist` is not set.
    pub fn delete(&self, name: &str, fail_not_exist: bool) -> Result<bool, QueueError> {
        match self.queues.remove(name) {
            Some((_, queue)) => {
                info!(name = %name, "Deleting queue");
                queue.messages().close();
                Ok(true)
            }
            None if fail_not_exist => Err(QueueError::QueueNotFound(name.to_string())),
            None => Ok(false),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn queue(&self, name: &str) -> Result<Arc<Queue>, QueueError> {
        self.queues
            .get(name)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    /// Snapshot of the queues whose names start with `prefix`, sorted by name
    pub fn list(&self, prefix: Option<&str>, include_metadata: bool) -> QueueListing {
        let mut entries: Vec<QueueInfo> = self
            .queues
            .iter()
            .filter(|q| prefix.map_or(true, |p| q.key().starts_with(p)))
            .map(|q| QueueInfo {
                name: q.key().clone(),
                metadata: include_metadata.then(|| q.value().metadata()),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        QueueListing {
            entries: entries.into_iter(),
        }
    }

    pub fn get_metadata(&self, name: &str) -> Result<Metadata, QueueError> {
        Ok(self.queue(name)?.metadata())
    }

    /// Replace the queue's metadata. `None` clears it.
    pub fn set_metadata(&self, name: &str, metadata: Option<Metadata>) -> Result<(), QueueError> {
        let metadata = metadata.unwrap_or_default();
        metadata.validate()?;

        let queue = self.queue(name)?;
        *queue.metadata.write() = metadata;
        Ok(())
    }

    pub fn get_acl(&self, name: &str) -> Result<SignedIdentifiers, QueueError> {
        Ok(self.queue(name)?.identifiers())
    }

    /// Replace the queue's stored access policies. `None` clears them.
    pub fn set_acl(
        &self,
        name: &str,
        identifiers: Option<SignedIdentifiers>,
    ) -> Result<(), QueueError> {
        let identifiers = identifiers.unwrap_or_default();
        validate_identifiers(&identifiers)?;

        let queue = self.queue(name)?;
        info!(name = %name, count = identifiers.len(), "Setting queue ACL");
        *queue.identifiers.write() = identifiers;
        Ok(())
    }

    /// Purge expired messages from every queue
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.snapshot()
            .iter()
            .map(|q| q.messages().purge_expired(now))
            .sum()
    }

    /// Messages held across all queues, expired or not
    pub fn resident_messages(&self) -> usize {
        self.snapshot().iter().map(|q| q.messages().len()).sum()
    }

    fn snapshot(&self) -> Vec<Arc<Queue>> {
        self.queues.iter().map(|q| Arc::clone(q.value())).collect()
    }
}

impl PolicyLookup for QueueRegistry {
    fn access_policy(&self, queue: &str, identifier: &str) -> Option<AccessPolicy> {
        self.queues
            .get(queue)
            .and_then(|q| q.identifiers.read().get(identifier).cloned())
    }
}
