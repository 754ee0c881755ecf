//! Error taxonomy for the core contracts
//!
//! Collaborator boundaries (detector, payment, receipt) use `anyhow`
//! and are isolated per call; these variants cover the contracts the
//! core itself owns.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Camera source cannot be opened. Fatal to that camera's
    /// pipeline only; other cameras are unaffected.
    #[error("camera source unavailable: {0}")]
    SourceUnavailable(String),

    /// No frame or event arrived within the deadline. Recoverable;
    /// the caller retries or skips a cycle.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Session or cart limit hit. Surfaced as a rejected operation.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Unknown session/customer/cart on a mutation path that
    /// requires existence. Read paths return `None` instead.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    /// True for errors a caller is expected to retry past
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoreError::Timeout(_))
    }
}
