//! In-memory queue service for QueueStack
//!
//! Provides queue storage with support for:
//! - CreateQueue, DeleteQueue, ListQueues, queue metadata
//! - PutMessage, GetMessages, PeekMessages, UpdateMessage, DeleteMessage, ClearMessages
//! - Visibility timeouts, pop receipts and message time-to-live
//! - Queue ACLs and shared access signatures
//! - Service properties (logging, metrics, CORS)

pub mod encoding;
pub mod metadata;
pub mod properties;
pub mod reclaimer;
pub mod registry;
pub mod service;
pub mod store;


pub use encoding::{MessageContent, MessageEncoding};
pub use metadata::Metadata;
pub use properties::{
    CorsRule, Logging, Metrics, RetentionPolicy, ServiceProperties, ServicePropertiesUpdate,
};
pub use reclaimer::spawn_reclaimer;
pub use registry::{validate_queue_name, Queue, QueueInfo, QueueListing, QueueRegistry};
pub use service::{QueueMessage, QueueMessages, QueueProperties, QueueService, MAX_MESSAGE_SIZE};
pub use store::{MessageStore, StoredMessage};

pub use queuestack_auth::{
    AccessPolicy, AccountPermissions, QueuePermissions, ResourceTypes, SasToken, SharedKey,
    SignedIdentifiers,
};
pub use queuestack_core::{Clock, ManualClock, QueueError, SystemClock};
