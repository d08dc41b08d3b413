//! Shared access signatures for QueueStack
//!
//! Implements signed queue and account tokens, stored access policies and the
//! permission checks that gate every queue operation.

pub mod operation;
pub mod permissions;
pub mod policy;
pub mod sas;

pub use operation::QueueOperation;
pub use permissions::{AccountPermissions, QueuePermissions, ResourceTypes};
pub use policy::{validate_identifiers, AccessPolicy, PolicyLookup, SignedIdentifiers};
pub use sas::{AccessController, SasError, SasScope, SasToken, SharedKey, SAS_VERSION};
