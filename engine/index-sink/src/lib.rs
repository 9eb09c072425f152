//! Search index document sink
//!
//! Writes each transaction into the search store as a document addressed by
//! its transaction id (`PUT {endpoint}/{index}/_doc/{id}`). Re-indexing the
//! same id overwrites the document, so the sink is idempotent by
//! construction and needs no batching; transient failures are retried
//! within a bounded budget before the document is given up on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sink_router::{BoxError, Sink};
use thiserror::Error;
use tracing::{debug, warn};

use commerce_events::{IngestedTransaction, Transaction};

/// Errors raised while indexing a document
#[derive(Error, Debug)]
pub enum IndexError {
    /// Transport-level failure (connect, timeout); transient
    #[error("index request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The index rejected the document; retrying the same body will not help
    #[error("index rejected document {id}: {status}")]
    Rejected { id: String, status: StatusCode },

    /// The index itself is unhealthy (5xx); transient
    #[error("index unavailable for document {id}: {status}")]
    Unavailable { id: String, status: StatusCode },

    /// The whole retry budget was spent on one document
    #[error("index retry budget exhausted for document {id} after {attempts} attempts: {last}")]
    RetriesExhausted { id: String, attempts: u32, last: String },
}

impl IndexError {
    fn is_transient(&self) -> bool {
        matches!(self, IndexError::Http(_) | IndexError::Unavailable { .. })
    }
}

/// Configuration for the search index connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base endpoint, e.g. `http://localhost:9200`
    pub endpoint: String,

    /// Index (document collection) name
    pub index: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Maximum PUT attempts per document, first try included
    pub max_retries: u32,

    /// Base delay between attempts; grows linearly with the attempt number
    pub retry_backoff_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9200".to_string(),
            index: "transaction".to_string(),
            request_timeout_secs: 30,
            max_retries: 5,
            retry_backoff_ms: 100,
        }
    }
}

/// Upserts transaction documents into the search index by natural id
pub struct IndexSink {
    client: Client,
    config: IndexConfig,
    indexed: u64,
}

impl IndexSink {
    pub fn new(config: IndexConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config, indexed: 0 })
    }

    fn document_url(&self, id: &str) -> String {
        format!(
            "{}/{}/_doc/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index,
            id
        )
    }

    /// Upsert one transaction as a document keyed by its transaction id.
    ///
    /// Transient failures (transport errors, 5xx) are retried with linear
    /// backoff until the budget is spent; a rejection (4xx) surfaces
    /// immediately since the same body would fail the same way again.
    pub async fn index(&mut self, transaction: &Transaction) -> Result<(), IndexError> {
        let id = transaction.transaction_id.clone();

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.attempt(&id, transaction).await {
                Ok(()) => {
                    self.indexed += 1;
                    debug!(%id, attempts, "transaction indexed");
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempts < self.config.max_retries => {
                    let delay = Duration::from_millis(self.config.retry_backoff_ms) * attempts;
                    warn!(
                        %id,
                        attempts,
                        max = self.config.max_retries,
                        error = %err,
                        "transient index failure, retrying after {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(IndexError::RetriesExhausted {
                        id,
                        attempts,
                        last: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, id: &str, transaction: &Transaction) -> Result<(), IndexError> {
        let response =
            self.client.put(self.document_url(id)).json(transaction).send().await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(IndexError::Unavailable { id: id.to_string(), status })
        } else {
            Err(IndexError::Rejected { id: id.to_string(), status })
        }
    }

    pub fn indexed_count(&self) -> u64 {
        self.indexed
    }
}

#[async_trait]
impl Sink<IngestedTransaction> for IndexSink {
    async fn deliver(&mut self, event: IngestedTransaction) -> Result<(), BoxError> {
        self.index(&event.transaction).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn sink_with(endpoint: String, max_retries: u32) -> IndexSink {
        IndexSink::new(IndexConfig {
            endpoint,
            index: "transaction".to_string(),
            request_timeout_secs: 5,
            max_retries,
            retry_backoff_ms: 1,
        })
        .unwrap()
    }

    fn transaction() -> Transaction {
        Transaction {
            transaction_id: "txn-001".to_string(),
            product_id: "p1".to_string(),
            product_name: "Widget".to_string(),
            product_category: "electronics".to_string(),
            product_price: BigDecimal::from(10),
            product_quantity: 1,
            product_brand: "acme".to_string(),
            total_amount: BigDecimal::from(10),
            currency: "USD".to_string(),
            customer_id: "c1".to_string(),
            transaction_date: Utc::now(),
            payment_method: "card".to_string(),
        }
    }

    /// Minimal HTTP stub: the first `fail_first` requests get `fail_status`,
    /// every request after that gets 200.
    async fn stub_server(fail_first: u32, fail_status: &'static str) -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicU32::new(0));

        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let hit = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let mut buf = [0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let status_line =
                    if hit <= fail_first { fail_status } else { "HTTP/1.1 200 OK" };
                let response =
                    format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (endpoint, hits)
    }

    #[test]
    fn document_url_uses_transaction_id_as_doc_id() {
        let sink = sink_with("http://localhost:9200/".to_string(), 5);
        assert_eq!(
            sink.document_url("txn-001"),
            "http://localhost:9200/transaction/_doc/txn-001"
        );
    }

    #[tokio::test]
    async fn unavailable_index_is_retried_up_to_the_bound() {
        let (endpoint, hits) = stub_server(u32::MAX, "HTTP/1.1 503 Service Unavailable").await;
        let mut sink = sink_with(endpoint, 3);

        let err = sink.index(&transaction()).await.unwrap_err();
        assert!(matches!(err, IndexError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(sink.indexed_count(), 0);
    }

    #[tokio::test]
    async fn rejected_document_is_not_retried() {
        let (endpoint, hits) = stub_server(u32::MAX, "HTTP/1.1 400 Bad Request").await;
        let mut sink = sink_with(endpoint, 5);

        let err = sink.index(&transaction()).await.unwrap_err();
        assert!(matches!(err, IndexError::Rejected { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_transient_failures_lands_within_budget() {
        let (endpoint, hits) = stub_server(2, "HTTP/1.1 503 Service Unavailable").await;
        let mut sink = sink_with(endpoint, 5);

        sink.index(&transaction()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(sink.indexed_count(), 1);
    }
}
