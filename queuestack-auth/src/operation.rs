//! Queue operations and the grants they require

use std::fmt;

use crate::permissions::{AccountPermissions, QueuePermissions, ResourceTypes};

/// Every operation the queue service exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOperation {
    CreateQueue,
    DeleteQueue,
    ListQueues,
    GetQueueMetadata,
    SetQueueMetadata,
    GetQueueAcl,
    SetQueueAcl,
    PutMessage,
    GetMessages,
    PeekMessages,
    UpdateMessage,
    DeleteMessage,
    ClearMessages,
    GetServiceProperties,
    SetServiceProperties,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateQueue => "CreateQueue",
            Self::DeleteQueue => "DeleteQueue",
            Self::ListQueues => "ListQueues",
            Self::GetQueueMetadata => "GetQueueMetadata",
            Self::SetQueueMetadata => "SetQueueMetadata",
            Self::GetQueueAcl => "GetQueueAcl",
            Self::SetQueueAcl => "SetQueueAcl",
            Self::PutMessage => "PutMessage",
            Self::GetMessages => "GetMessages",
            Self::PeekMessages => "PeekMessages",
            Self::UpdateMessage => "UpdateMessage",
            Self::DeleteMessage => "DeleteMessage",
            Self::ClearMessages => "ClearMessages",
            Self::GetServiceProperties => "GetServiceProperties",
            Self::SetServiceProperties => "SetServiceProperties",
        }
    }

    /// Permission a queue token must carry, or `None` if queue tokens can
    /// never perform the operation.
    pub fn queue_permission(&self) -> Option<QueuePermissions> {
        match self {
            Self::PeekMessages | Self::GetQueueMetadata => Some(QueuePermissions::READ),
            Self::PutMessage => Some(QueuePermissions::ADD),
            Self::UpdateMessage => Some(QueuePermissions::UPDATE),
            Self::GetMessages | Self::DeleteMessage => Some(QueuePermissions::PROCESS),
            Self::CreateQueue
            | Self::DeleteQueue
            | Self::ListQueues
            | Self::SetQueueMetadata
            | Self::GetQueueAcl
            | Self::SetQueueAcl
            | Self::ClearMessages
            | Self::GetServiceProperties
            | Self::SetServiceProperties => None,
        }
    }

    /// Resource level and permission an account token must carry
    pub fn account_requirement(&self) -> (ResourceTypes, AccountPermissions) {
        match self {
            Self::ListQueues => (ResourceTypes::SERVICE, AccountPermissions::LIST),
            Self::GetServiceProperties => (ResourceTypes::SERVICE, AccountPermissions::READ),
            Self::SetServiceProperties => (ResourceTypes::SERVICE, AccountPermissions::WRITE),
            Self::CreateQueue => (ResourceTypes::CONTAINER, AccountPermissions::CREATE),
            Self::DeleteQueue => (ResourceTypes::CONTAINER, AccountPermissions::DELETE),
            Self::GetQueueMetadata | Self::GetQueueAcl => {
                (ResourceTypes::CONTAINER, AccountPermissions::READ)
            }
            Self::SetQueueMetadata | Self::SetQueueAcl => {
                (ResourceTypes::CONTAINER, AccountPermissions::WRITE)
            }
            Self::PeekMessages => (ResourceTypes::OBJECT, AccountPermissions::READ),
            Self::PutMessage => (ResourceTypes::OBJECT, AccountPermissions::ADD),
            Self::UpdateMessage => (ResourceTypes::OBJECT, AccountPermissions::UPDATE),
            Self::GetMessages | Self::DeleteMessage => {
                (ResourceTypes::OBJECT, AccountPermissions::PROCESS)
            }
            Self::ClearMessages => (ResourceTypes::OBJECT, AccountPermissions::DELETE),
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
