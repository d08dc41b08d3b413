//! Core types and traits for QueueStack
//!
//! This crate provides the error taxonomy, request identifiers and the clock
//! abstraction shared by every QueueStack crate.

pub mod clock;
pub mod error;
pub mod request_id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorCode, ErrorResponse, QueueError, ReceiptFailure};
pub use request_id::RequestId;
