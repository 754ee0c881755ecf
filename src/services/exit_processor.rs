//! Exit finalization
//!
//! Combines a session and its cart snapshot into an immutable
//! transaction, delegating to the payment and receipt collaborators.
//! A collaborator failure never blocks the exit: the customer must
//! always be able to leave, and reconciliation happens out of band.

use crate::domain::{
    new_uuid_v7, CameraId, CustomerId, PaymentStatus, SessionId, Transaction, TransactionItem,
};
use crate::io::collaborators::{PaymentGateway, ReceiptRenderer, RecordStore};
use crate::io::egress::TransactionLog;
use crate::services::cart::VirtualCart;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct ExitProcessor {
    payment: Option<Arc<dyn PaymentGateway>>,
    receipts: Option<Arc<dyn ReceiptRenderer>>,
    log: TransactionLog,
    records: Option<Arc<dyn RecordStore>>,
}

impl ExitProcessor {
    pub fn new(
        payment: Option<Arc<dyn PaymentGateway>>,
        receipts: Option<Arc<dyn ReceiptRenderer>>,
        log: TransactionLog,
        records: Option<Arc<dyn RecordStore>>,
    ) -> Self {
        Self { payment, receipts, log, records }
    }

    /// Finalize a departure into an immutable transaction record
    pub async fn process_exit(
        &self,
        session_id: &SessionId,
        customer_id: &CustomerId,
        cart: &VirtualCart,
        exit_camera: Option<CameraId>,
    ) -> Transaction {
        let transaction_id = format!("txn-{}", new_uuid_v7());
        info!(
            transaction_id = %transaction_id,
            session_id = %session_id,
            customer_id = %customer_id,
            total = %cart.total_amount,
            "processing_exit"
        );

        let mut items: Vec<TransactionItem> = cart
            .items
            .values()
            .map(|item| TransactionItem {
                label: item.label.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total(),
                avg_confidence: item.avg_confidence(),
            })
            .collect();
        items.sort_by(|a, b| a.label.cmp(&b.label));

        let (payment_status, payment_ref) = self.settle(customer_id, cart, &transaction_id).await;

        let mut txn = Transaction {
            transaction_id,
            session_id: session_id.clone(),
            customer_id: customer_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            total_amount: cart.total_amount,
            item_count: cart.item_count(),
            items,
            payment_status,
            payment_ref,
            receipt_ref: None,
            exit_camera,
        };

        if let Some(receipts) = &self.receipts {
            match receipts.render(&txn) {
                Ok(receipt_ref) => txn.receipt_ref = Some(receipt_ref),
                Err(e) => error!(
                    transaction_id = %txn.transaction_id,
                    error = %e,
                    "receipt_render_failed"
                ),
            }
        }

        self.log.write(&txn);
        if let Some(records) = &self.records {
            if let Err(e) = records.put(&txn.transaction_id, &txn.to_json()) {
                error!(transaction_id = %txn.transaction_id, error = %e, "transaction_persist_failed");
            }
        }

        info!(
            transaction_id = %txn.transaction_id,
            status = %txn.payment_status.as_str(),
            items = %txn.item_count,
            "exit_processed"
        );
        txn
    }

    /// Nothing due settles immediately; an unreachable or failing
    /// gateway leaves the transaction pending rather than trapping
    /// the customer at the door.
    async fn settle(
        &self,
        customer_id: &CustomerId,
        cart: &VirtualCart,
        transaction_id: &str,
    ) -> (PaymentStatus, Option<String>) {
        if cart.total_amount <= 0.0 {
            return (PaymentStatus::Completed, None);
        }
        let Some(payment) = &self.payment else {
            return (PaymentStatus::Pending, None);
        };
        match payment.pay(customer_id, cart.total_amount, transaction_id).await {
            Ok(outcome) => (outcome.status, Some(outcome.reference)),
            Err(e) => {
                warn!(
                    customer_id = %customer_id,
                    amount = %cart.total_amount,
                    error = %e,
                    "payment_failed_pending"
                );
                (PaymentStatus::Pending, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionId;
    use crate::io::collaborators::{MemoryStore, PaymentOutcome, TextReceiptRenderer};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FixedGateway {
        fail: bool,
    }

    #[async_trait]
    impl PaymentGateway for FixedGateway {
        async fn pay(
            &self,
            _customer_id: &CustomerId,
            _amount: f64,
            transaction_id: &str,
        ) -> anyhow::Result<PaymentOutcome> {
            if self.fail {
                anyhow::bail!("gateway unreachable");
            }
            Ok(PaymentOutcome {
                status: PaymentStatus::Completed,
                reference: format!("pay-{transaction_id}"),
            })
        }
    }

    fn empty_cart() -> VirtualCart {
        VirtualCart::new(CustomerId::from("C1"), SessionId("S1".to_string()))
    }

    fn cart_with_milk() -> VirtualCart {
        let mut cart = empty_cart();
        cart.add_item("milk", 2.50, 0.9, 1_000);
        cart.add_item("milk", 2.50, 0.95, 2_000);
        cart
    }

    fn processor(fail_payment: bool, dir: &std::path::Path) -> (ExitProcessor, Arc<MemoryStore>) {
        let records = Arc::new(MemoryStore::new());
        let log = TransactionLog::new(dir.join("transactions.jsonl").to_str().unwrap());
        let processor = ExitProcessor::new(
            Some(Arc::new(FixedGateway { fail: fail_payment })),
            Some(Arc::new(TextReceiptRenderer::new("Test Store"))),
            log,
            Some(records.clone()),
        );
        (processor, records)
    }

    #[tokio::test]
    async fn test_exit_with_successful_payment() {
        let dir = tempdir().unwrap();
        let (processor, records) = processor(false, dir.path());
        let cart = cart_with_milk();

        let txn = processor
            .process_exit(
                &SessionId("S1".to_string()),
                &CustomerId::from("C1"),
                &cart,
                Some(CameraId::from("cam-exit")),
            )
            .await;

        assert_eq!(txn.payment_status, PaymentStatus::Completed);
        assert_eq!(txn.total_amount, 5.00);
        assert_eq!(txn.item_count, 2);
        assert!(txn.payment_ref.is_some());
        assert!(txn.receipt_ref.as_deref().unwrap().contains("Test Store"));
        assert!(records.get(&txn.transaction_id).is_some());
    }

    #[tokio::test]
    async fn test_payment_failure_records_pending() {
        let dir = tempdir().unwrap();
        let (processor, _records) = processor(true, dir.path());
        let cart = cart_with_milk();

        let txn = processor
            .process_exit(&SessionId("S1".to_string()), &CustomerId::from("C1"), &cart, None)
            .await;

        // Exit is never aborted; reconciliation is out of band
        assert_eq!(txn.payment_status, PaymentStatus::Pending);
        assert!(txn.payment_ref.is_none());
        assert!(txn.receipt_ref.is_some());
    }

    #[tokio::test]
    async fn test_empty_cart_skips_payment() {
        let dir = tempdir().unwrap();
        // A failing gateway must not matter when nothing is due
        let (processor, _records) = processor(true, dir.path());
        let cart = empty_cart();

        let txn = processor
            .process_exit(&SessionId("S1".to_string()), &CustomerId::from("C1"), &cart, None)
            .await;

        assert_eq!(txn.payment_status, PaymentStatus::Completed);
        assert_eq!(txn.total_amount, 0.0);
        assert!(txn.items.is_empty());
    }

    #[tokio::test]
    async fn test_no_collaborators_configured() {
        let dir = tempdir().unwrap();
        let log = TransactionLog::new(dir.path().join("t.jsonl").to_str().unwrap());
        let processor = ExitProcessor::new(None, None, log, None);
        let cart = cart_with_milk();

        let txn = processor
            .process_exit(&SessionId("S1".to_string()), &CustomerId::from("C1"), &cart, None)
            .await;

        assert_eq!(txn.payment_status, PaymentStatus::Pending);
        assert!(txn.receipt_ref.is_none());
    }
}
