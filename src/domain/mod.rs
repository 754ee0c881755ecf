//! Domain models - core business types
//!
//! This module contains the canonical data types used throughout the system:
//! - `Frame` / `Detection` / `IdentityMatch` - per-frame observations
//! - `ProductEvent` - discrete pick/return events
//! - `Transaction` - finalized checkout record
//! - `CoreError` - error taxonomy for the core contracts

pub mod error;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use error::CoreError;
pub use transaction::{PaymentStatus, Transaction, TransactionItem};
pub use types::{
    epoch_ms, new_uuid_v7, BoundingBox, CameraId, CustomerId, Detection, EventKind, Frame,
    IdentityMatch, ProductEvent, SessionId, TaggedFrame,
};
