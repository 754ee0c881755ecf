//! External collaborator contracts
//!
//! The core consumes product detection, customer identification,
//! price lookup, payment, receipt rendering, and record persistence
//! as black-box services behind these traits. Failures are isolated
//! per call by the callers.

use crate::domain::{CustomerId, Detection, IdentityMatch, PaymentStatus, Transaction};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Product detection: image in, labeled boxes out.
/// Called once per processed frame.
#[async_trait]
pub trait ProductDetector: Send + Sync {
    async fn detect(&self, image: &Bytes) -> anyhow::Result<Vec<Detection>>;
}

/// Customer identification: image in, identity matches out.
/// Optional; when absent, customer correlation is supplied by the
/// entry authentication flow.
#[async_trait]
pub trait CustomerIdentifier: Send + Sync {
    async fn identify(&self, image: &Bytes) -> anyhow::Result<Vec<IdentityMatch>>;
}

/// Unit price lookup by product label
pub trait PriceLookup: Send + Sync {
    /// Returns 0.0 (and logs) for an unknown product
    fn price(&self, label: &str) -> f64;
}

/// Result of a payment attempt
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub status: PaymentStatus,
    pub reference: String,
}

/// Payment settlement collaborator
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn pay(
        &self,
        customer_id: &CustomerId,
        amount: f64,
        transaction_id: &str,
    ) -> anyhow::Result<PaymentOutcome>;
}

/// Receipt rendering collaborator; returns an opaque receipt reference
pub trait ReceiptRenderer: Send + Sync {
    fn render(&self, transaction: &Transaction) -> anyhow::Result<String>;
}

/// Persisted records keyed by stable string ids. The core only
/// requires get/put/delete; the backing format is external.
pub trait RecordStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> bool;
}

/// Price table loaded from a `label,price` CSV file.
/// Lookups are case-insensitive.
pub struct CsvPriceTable {
    prices: FxHashMap<String, f64>,
}

impl CsvPriceTable {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("failed to read price file {}: {e}", path.as_ref().display())
        })?;
        let mut prices = FxHashMap::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((label, price)) = line.split_once(',') else {
                warn!(line = %line, "price_line_malformed");
                continue;
            };
            match price.trim().parse::<f64>() {
                Ok(value) => {
                    prices.insert(label.trim().to_lowercase(), value);
                }
                Err(_) => warn!(line = %line, "price_value_malformed"),
            }
        }
        info!(products = %prices.len(), "price_table_loaded");
        Ok(Self { prices })
    }

    pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        let prices =
            pairs.iter().map(|(label, price)| (label.to_lowercase(), *price)).collect();
        Self { prices }
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl PriceLookup for CsvPriceTable {
    fn price(&self, label: &str) -> f64 {
        match self.prices.get(&label.to_lowercase()) {
            Some(price) => *price,
            None => {
                warn!(label = %label, "price_unknown_product");
                0.0
            }
        }
    }
}

/// Plain-text receipt renderer. The rendered text is the receipt
/// reference; PDF layout is out of scope.
pub struct TextReceiptRenderer {
    store_name: String,
}

impl TextReceiptRenderer {
    pub fn new(store_name: &str) -> Self {
        Self { store_name: store_name.to_string() }
    }
}

impl ReceiptRenderer for TextReceiptRenderer {
    fn render(&self, txn: &Transaction) -> anyhow::Result<String> {
        let mut lines = vec![
            self.store_name.clone(),
            "=".repeat(40),
            format!("transaction: {}", txn.transaction_id),
            format!("customer: {}", txn.customer_id),
            String::new(),
        ];
        for item in &txn.items {
            lines.push(format!(
                "{}x {:<20} {:.2} each = {:.2}",
                item.quantity, item.label, item.unit_price, item.line_total
            ));
        }
        lines.push("-".repeat(40));
        lines.push(format!("total: {:.2}", txn.total_amount));
        Ok(lines.join("\n"))
    }
}

/// In-memory record store, for tests and single-process deployments
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<FxHashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.records.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.records.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> bool {
        self.records.lock().remove(key).is_some()
    }
}

/// File-per-key JSON record store
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf() })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl RecordStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> bool {
        std::fs::remove_file(self.path_for(key)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_csv_price_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "apple,1.50").unwrap();
        writeln!(file, "Milk, 2.50").unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "broken-line").unwrap();

        let table = CsvPriceTable::from_file(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.price("apple"), 1.50);
        assert_eq!(table.price("MILK"), 2.50);
        // Unknown product returns zero rather than failing
        assert_eq!(table.price("caviar"), 0.0);
    }

    #[test]
    fn test_csv_price_table_missing_file() {
        assert!(CsvPriceTable::from_file("/nonexistent/prices.csv").is_err());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("k").is_none());
        store.put("k", "{\"a\":1}").unwrap();
        assert_eq!(store.get("k").unwrap(), "{\"a\":1}");
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
    }

    #[test]
    fn test_json_file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("records")).unwrap();

        store.put("txn-1", "{\"total\":5.0}").unwrap();
        assert_eq!(store.get("txn-1").unwrap(), "{\"total\":5.0}");
        assert!(store.delete("txn-1"));
        assert!(store.get("txn-1").is_none());
    }
}
