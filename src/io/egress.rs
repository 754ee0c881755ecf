//! Transaction egress - writes finalized transactions to file
//!
//! Transactions are written in JSONL format (one JSON object per
//! line) to the file specified in config.

use crate::domain::Transaction;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Egress writer for finalized transactions
pub struct TransactionLog {
    file_path: String,
}

impl TransactionLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "transaction_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a transaction to the egress file.
    /// Returns true if successful, false otherwise.
    pub fn write(&self, txn: &Transaction) -> bool {
        let json = txn.to_json();

        match self.append_line(&json) {
            Ok(()) => {
                info!(
                    transaction_id = %txn.transaction_id,
                    customer_id = %txn.customer_id,
                    total = %txn.total_amount,
                    status = %txn.payment_status.as_str(),
                    "transaction_egressed"
                );
                true
            }
            Err(e) => {
                error!(
                    transaction_id = %txn.transaction_id,
                    error = %e,
                    "transaction_egress_failed"
                );
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }
}
