//! Transaction event type and payload decoding

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregates::MonthKey;

/// Errors raised while turning a raw log payload into a `Transaction`
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not valid JSON or does not match the transaction shape
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload parsed but a required field is empty or out of range
    #[error("invalid transaction: {0}")]
    Invalid(String),
}

/// A single purchase event from the transaction log.
///
/// Immutable once decoded; `transaction_id` is the natural key for both the
/// relational upsert and the search index document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub product_id: String,
    pub product_name: String,
    pub product_category: String,
    pub product_price: BigDecimal,
    pub product_quantity: i32,
    pub product_brand: String,
    pub total_amount: BigDecimal,
    pub currency: String,
    pub customer_id: String,
    pub transaction_date: DateTime<Utc>,
    pub payment_method: String,
}

impl Transaction {
    /// Decode a raw payload and validate required fields.
    ///
    /// A failure here means the record is skipped and counted by the source;
    /// nothing malformed ever reaches an aggregator.
    pub fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        let txn: Transaction = serde_json::from_slice(payload)?;
        txn.validate()?;
        Ok(txn)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.transaction_id.is_empty() {
            return Err(DecodeError::Invalid("transaction_id is empty".to_string()));
        }
        if self.product_category.is_empty() {
            return Err(DecodeError::Invalid("product_category is empty".to_string()));
        }
        if self.product_quantity < 0 {
            return Err(DecodeError::Invalid(format!(
                "product_quantity is negative: {}",
                self.product_quantity
            )));
        }
        Ok(())
    }
}

/// A transaction stamped with the time the pipeline ingested it.
///
/// Aggregation buckets use the processing date, not the event-time
/// `transaction_date` (processing-time semantics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedTransaction {
    pub transaction: Transaction,
    pub ingested_at: DateTime<Utc>,
    /// Monotone ingress sequence assigned by the source, starting at 1.
    /// Sinks acknowledge the highest sequence they have made durable; the
    /// source commits log offsets only up to the acknowledged watermark.
    pub seq: u64,
}

impl IngestedTransaction {
    /// Stamp a freshly decoded transaction with the current time.
    ///
    /// The sequence starts at zero (unassigned); the source numbers the
    /// event when it enters the pipeline.
    pub fn now(transaction: Transaction) -> Self {
        Self { transaction, ingested_at: Utc::now(), seq: 0 }
    }

    /// Calendar day bucket for daily and per-category aggregation
    pub fn day(&self) -> NaiveDate {
        self.ingested_at.date_naive()
    }

    /// (year, month) bucket for monthly aggregation
    pub fn month_key(&self) -> MonthKey {
        MonthKey::from_date(self.day())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::FromPrimitive;

    fn sample_json() -> String {
        r#"{
            "transaction_id": "txn-001",
            "product_id": "prod-9",
            "product_name": "Mechanical Keyboard",
            "product_category": "electronics",
            "product_price": 49.99,
            "product_quantity": 2,
            "product_brand": "keychron",
            "total_amount": 99.98,
            "currency": "USD",
            "customer_id": "cust-42",
            "transaction_date": "2024-03-05T14:30:00Z",
            "payment_method": "credit_card"
        }"#
        .to_string()
    }

    #[test]
    fn decodes_well_formed_payload() {
        let txn = Transaction::from_payload(sample_json().as_bytes()).unwrap();
        assert_eq!(txn.transaction_id, "txn-001");
        assert_eq!(txn.product_category, "electronics");
        assert_eq!(txn.product_quantity, 2);
        assert_eq!(txn.total_amount, BigDecimal::from_f64(99.98).unwrap());
    }

    #[test]
    fn rejects_non_json_payload() {
        let err = Transaction::from_payload(b"not json at all").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn rejects_empty_transaction_id() {
        let json = sample_json().replace("txn-001", "");
        let err = Transaction::from_payload(json.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_quantity() {
        let json = sample_json().replace("\"product_quantity\": 2", "\"product_quantity\": -1");
        let err = Transaction::from_payload(json.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }

    #[test]
    fn ingested_transaction_buckets_by_processing_day() {
        use chrono::Datelike;

        let txn = Transaction::from_payload(sample_json().as_bytes()).unwrap();
        let ingested = IngestedTransaction::now(txn);
        assert_eq!(ingested.day(), Utc::now().date_naive());
        assert_eq!(ingested.month_key().month, ingested.day().month());
        assert_eq!(ingested.month_key().year, ingested.day().year());
    }
}
