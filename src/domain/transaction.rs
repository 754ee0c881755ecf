//! Finalized checkout transaction record
//!
//! Produced once by the exit processor and never mutated afterwards.

use crate::domain::types::{CameraId, CustomerId, SessionId};
use serde::Serialize;

/// Settlement state of a transaction.
///
/// `Pending` covers every path where payment could not be confirmed
/// at exit time (collaborator failure, no gateway configured);
/// reconciliation happens out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Completed,
    Pending,
}

impl PaymentStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Completed => "completed",
            PaymentStatus::Pending => "pending",
        }
    }
}

/// One line of a finalized transaction
#[derive(Debug, Clone, Serialize)]
pub struct TransactionItem {
    pub label: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub line_total: f64,
    pub avg_confidence: f32,
}

/// Immutable record of a completed checkout
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub session_id: SessionId,
    pub customer_id: CustomerId,
    /// RFC 3339, assembled at finalization time
    pub timestamp: String,
    pub total_amount: f64,
    pub item_count: u32,
    pub items: Vec<TransactionItem>,
    pub payment_status: PaymentStatus,
    /// Reference returned by the payment collaborator, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_ref: Option<String>,
    /// Reference returned by the receipt collaborator, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_camera: Option<CameraId>,
}

impl Transaction {
    /// Serialize as a single JSON line for egress
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
