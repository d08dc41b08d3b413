//! Queue service facade
//!
//! `QueueService` is the public entry point. Handles are cheap to clone and
//! share one state: the registry, the account key, service properties and
//! the clock. A handle may carry a shared access signature, in which case
//! every call is authorized against it; a plain handle holds the account key
//! and may do anything.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use queuestack_auth::{
    AccessController, AccountPermissions, QueueOperation, QueuePermissions, ResourceTypes,
    SasToken, SharedKey, SignedIdentifiers,
};
use queuestack_core::{Clock, ErrorResponse, QueueError, RequestId, SystemClock};
use std::sync::Arc;
use tracing::{info_span, warn};

use crate::encoding::{MessageContent, MessageEncoding};
use crate::metadata::Metadata;
use crate::properties::{ServiceProperties, ServicePropertiesUpdate};
use crate::registry::{QueueListing, QueueRegistry};
use crate::store::StoredMessage;

/// Largest encoded message payload: 64 KiB
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// A message as returned to callers.
///
/// `pop_receipt` and `time_next_visible` are only set by operations that
/// check the message out (put, get and update); peek leaves them empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub insertion_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub dequeue_count: u32,
    pub content: MessageContent,
    pub pop_receipt: Option<String>,
    pub time_next_visible: Option<DateTime<Utc>>,
}

/// Messages handed out by one get or peek call
#[derive(Debug)]
pub struct QueueMessages {
    messages: std::vec::IntoIter<QueueMessage>,
}

impl Iterator for QueueMessages {
    type Item = QueueMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.messages.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.messages.size_hint()
    }
}

impl ExactSizeIterator for QueueMessages {}

/// Metadata plus message count of a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueProperties {
    pub metadata: Metadata,
    pub approximate_message_count: usize,
}

struct ServiceState {
    registry: QueueRegistry,
    access: AccessController,
    properties: RwLock<ServiceProperties>,
    clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct QueueService {
    state: Arc<ServiceState>,
    encoding: MessageEncoding,
    credential: Option<Arc<SasToken>>,
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("account", &self.state.access.account())
            .field("encoding", &self.encoding)
            .field("sas", &self.credential.is_some())
            .finish()
    }
}

impl QueueService {
    /// New service for `account`, signing tokens with `key`
    pub fn new(account: impl Into<String>, key: SharedKey) -> Self {
        Self::with_clock(account, key, Arc::new(SystemClock))
    }

    /// New service reading time from `clock`
    pub fn with_clock(account: impl Into<String>, key: SharedKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(ServiceState {
                registry: QueueRegistry::new(),
                access: AccessController::new(account, key),
                properties: RwLock::new(ServiceProperties::default()),
                clock,
            }),
            encoding: MessageEncoding::default(),
            credential: None,
        }
    }

    /// Handle on the same service using a different message encoding
    pub fn with_encoding(&self, encoding: MessageEncoding) -> Self {
        Self {
            encoding,
            ..self.clone()
        }
    }

    /// Handle on the same service that authenticates with `token` instead of
    /// the account key
    pub fn with_sas_token(&self, token: SasToken) -> Self {
        Self {
            credential: Some(Arc::new(token)),
            ..self.clone()
        }
    }

    pub fn account(&self) -> &str {
        self.state.access.account()
    }

    pub fn encoding(&self) -> MessageEncoding {
        self.encoding
    }

    // Queues

    pub fn create_queue(
        &self,
        name: &str,
        metadata: Option<Metadata>,
        fail_on_exist: bool,
    ) -> Result<bool, QueueError> {
        self.call(QueueOperation::CreateQueue, Some(name), |now| {
            self.state
                .registry
                .create(name, metadata.unwrap_or_default(), fail_on_exist, now)
        })
    }

    pub fn delete_queue(&self, name: &str, fail_not_exist: bool) -> Result<bool, QueueError> {
        self.call(QueueOperation::DeleteQueue, Some(name), |_| {
            self.state.registry.delete(name, fail_not_exist)
        })
    }

    pub fn exists(&self, name: &str) -> Result<bool, QueueError> {
        self.call(QueueOperation::GetQueueMetadata, Some(name), |_| {
            Ok(self.state.registry.exists(name))
        })
    }

    pub fn list_queues(
        &self,
        prefix: Option<&str>,
        include_metadata: bool,
    ) -> Result<QueueListing, QueueError> {
        self.call(QueueOperation::ListQueues, None, |_| {
            Ok(self.state.registry.list(prefix, include_metadata))
        })
    }

    pub fn get_queue_metadata(&self, name: &str) -> Result<QueueProperties, QueueError> {
        self.call(QueueOperation::GetQueueMetadata, Some(name), |now| {
            let queue = self.state.registry.queue(name)?;
            let approximate_message_count = queue.messages().approximate_count(now);
            Ok(QueueProperties {
                metadata: queue.metadata(),
                approximate_message_count,
            })
        })
    }

    /// Replace the queue's metadata; `None` clears it
    pub fn set_queue_metadata(
        &self,
        name: &str,
        metadata: Option<Metadata>,
    ) -> Result<(), QueueError> {
        self.call(QueueOperation::SetQueueMetadata, Some(name), |_| {
            self.state.registry.set_metadata(name, metadata)
        })
    }

    pub fn get_queue_acl(&self, name: &str) -> Result<SignedIdentifiers, QueueError> {
        self.call(QueueOperation::GetQueueAcl, Some(name), |_| {
            self.state.registry.get_acl(name)
        })
    }

    /// Replace the queue's stored access policies; `None` clears them
    pub fn set_queue_acl(
        &self,
        name: &str,
        identifiers: Option<SignedIdentifiers>,
    ) -> Result<(), QueueError> {
        self.call(QueueOperation::SetQueueAcl, Some(name), |_| {
            self.state.registry.set_acl(name, identifiers)
        })
    }

    // Messages

    /// Enqueue a message. It becomes visible after `visibility_timeout`
    /// (default 0) and expires after `time_to_live` (default 7 days).
    pub fn put_message(
        &self,
        queue: &str,
        content: impl Into<MessageContent>,
        visibility_timeout: Option<Duration>,
        time_to_live: Option<Duration>,
    ) -> Result<QueueMessage, QueueError> {
        let content = content.into();
        self.call(QueueOperation::PutMessage, Some(queue), |now| {
            let payload = self.encode(&content)?;
            let queue = self.state.registry.queue(queue)?;
            let stored = queue
                .messages()
                .put(payload, now, visibility_timeout, time_to_live)?;
            Ok(checked_out(stored, content))
        })
    }

    /// Check out up to `num_messages` (default 1) visible messages, hiding
    /// them for `visibility_timeout` (default 30s)
    pub fn get_messages(
        &self,
        queue: &str,
        num_messages: Option<u32>,
        visibility_timeout: Option<Duration>,
    ) -> Result<QueueMessages, QueueError> {
        self.call(QueueOperation::GetMessages, Some(queue), |now| {
            let queue = self.state.registry.queue(queue)?;
            let messages =
                queue
                    .messages()
                    .get_with(now, num_messages, visibility_timeout, |m| {
                        let content = self.encoding.decode(&m.payload)?;
                        Ok(checked_out(m.clone(), content))
                    })?;
            Ok(QueueMessages {
                messages: messages.into_iter(),
            })
        })
    }

    /// Look at up to `num_messages` (default 1) visible messages without
    /// checking them out
    pub fn peek_messages(
        &self,
        queue: &str,
        num_messages: Option<u32>,
    ) -> Result<QueueMessages, QueueError> {
        self.call(QueueOperation::PeekMessages, Some(queue), |now| {
            let queue = self.state.registry.queue(queue)?;
            let messages = queue
                .messages()
                .peek(now, num_messages)?
                .into_iter()
                .map(|m| {
                    let content = self.encoding.decode(&m.payload)?;
                    Ok(peeked(m, content))
                })
                .collect::<Result<Vec<_>, QueueError>>()?;
            Ok(QueueMessages {
                messages: messages.into_iter(),
            })
        })
    }

    /// Change a checked-out message's visibility and optionally its content.
    /// The returned message carries the new pop receipt.
    pub fn update_message(
        &self,
        queue: &str,
        id: &str,
        pop_receipt: &str,
        visibility_timeout: Duration,
        content: Option<MessageContent>,
    ) -> Result<QueueMessage, QueueError> {
        self.call(QueueOperation::UpdateMessage, Some(queue), |now| {
            let payload = content.as_ref().map(|c| self.encode(c)).transpose()?;
            let queue = self.state.registry.queue(queue)?;
            let message = queue.messages().update_with(
                now,
                id,
                pop_receipt,
                visibility_timeout,
                payload,
                |m| {
                    let content = self.encoding.decode(&m.payload)?;
                    Ok(checked_out(m.clone(), content))
                },
            )?;
            Ok(message)
        })
    }

    pub fn delete_message(
        &self,
        queue: &str,
        id: &str,
        pop_receipt: &str,
    ) -> Result<(), QueueError> {
        self.call(QueueOperation::DeleteMessage, Some(queue), |now| {
            let queue = self.state.registry.queue(queue)?;
            let result = queue.messages().delete(now, id, pop_receipt);
            result
        })
    }

    pub fn clear_messages(&self, queue: &str) -> Result<(), QueueError> {
        self.call(QueueOperation::ClearMessages, Some(queue), |_| {
            let queue = self.state.registry.queue(queue)?;
            let result = queue.messages().clear();
            result
        })
    }

    // Shared access signatures

    /// Self-contained token granting `permission` on `queue` until `expiry`
    pub fn generate_queue_sas(
        &self,
        queue: &str,
        permission: QueuePermissions,
        expiry: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
    ) -> Result<SasToken, QueueError> {
        self.require_account_key()?;
        Ok(self
            .state
            .access
            .generate_queue_token(queue, permission, expiry, start))
    }

    /// Token whose grant comes from the stored policy `identifier` on `queue`
    pub fn generate_queue_sas_for_identifier(
        &self,
        queue: &str,
        identifier: &str,
    ) -> Result<SasToken, QueueError> {
        self.require_account_key()?;
        Ok(self
            .state
            .access
            .generate_identifier_token(queue, identifier))
    }

    pub fn generate_account_sas(
        &self,
        resource_types: ResourceTypes,
        permission: AccountPermissions,
        expiry: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
    ) -> Result<SasToken, QueueError> {
        self.require_account_key()?;
        Ok(self
            .state
            .access
            .generate_account_token(resource_types, permission, expiry, start))
    }

    // Service properties

    pub fn get_service_properties(&self) -> Result<ServiceProperties, QueueError> {
        self.call(QueueOperation::GetServiceProperties, None, |_| {
            Ok(self.state.properties.read().clone())
        })
    }

    pub fn set_service_properties(
        &self,
        update: ServicePropertiesUpdate,
    ) -> Result<(), QueueError> {
        self.call(QueueOperation::SetServiceProperties, None, |_| {
            self.state.properties.write().apply(update)
        })
    }

    // Housekeeping

    /// Drop expired messages from every queue
    pub fn purge_expired(&self) -> usize {
        self.state.registry.purge_expired(self.state.clock.now())
    }

    /// Messages held in memory, including expired ones not yet purged
    pub fn resident_messages(&self) -> usize {
        self.state.registry.resident_messages()
    }

    /// Single authorization point for every operation
    fn call<T>(
        &self,
        operation: QueueOperation,
        queue: Option<&str>,
        f: impl FnOnce(DateTime<Utc>) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let request_id = RequestId::new();
        let span = info_span!(
            "queue_request",
            request_id = %request_id,
            operation = %operation,
            queue = queue.unwrap_or("-"),
        );
        let _entered = span.enter();

        let now = self.state.clock.now();
        let result = match &self.credential {
            Some(token) => self
                .state
                .access
                .authorize(token, queue, operation, now, &self.state.registry)
                .map_err(QueueError::from)
                .and_then(|()| f(now)),
            None => f(now),
        };

        if let Err(e) = &result {
            let mut response = ErrorResponse::from_error(e).with_request_id(request_id.id.clone());
            if let Some(queue) = queue {
                response = response.with_resource(queue);
            }
            warn!(error = %response.to_json(), "Request failed");
        }
        result
    }

    fn require_account_key(&self) -> Result<(), QueueError> {
        if self.credential.is_some() {
            return Err(QueueError::AccessDenied(
                "generating a shared access signature requires the account key".into(),
            ));
        }
        Ok(())
    }

    fn encode(&self, content: &MessageContent) -> Result<String, QueueError> {
        let payload = self.encoding.encode(content)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(QueueError::invalid_argument(format!(
                "message of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(payload)
    }
}

fn checked_out(stored: StoredMessage, content: MessageContent) -> QueueMessage {
    QueueMessage {
        id: stored.id,
        insertion_time: stored.insertion_time,
        expiration_time: stored.expiration_time,
        dequeue_count: stored.dequeue_count,
        content,
        pop_receipt: Some(stored.pop_receipt),
        time_next_visible: Some(stored.time_next_visible),
    }
}

fn peeked(stored: StoredMessage, content: MessageContent) -> QueueMessage {
    QueueMessage {
        pop_receipt: None,
        time_next_visible: None,
        ..checked_out(stored, content)
    }
}
