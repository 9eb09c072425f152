//! Postgres upsert writers for the four pipeline tables

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use commerce_events::{CategorySales, DailySales, MonthlySales, Transaction};

use crate::error::{Result, SinkError};
use crate::writer::UpsertWriter;

/// Create the pipeline tables if they do not exist yet.
///
/// Keys match the upsert statements: natural key for raw transactions,
/// composite bucket keys for the aggregate tables.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS transactions (
            transaction_id VARCHAR(255) PRIMARY KEY,
            product_id VARCHAR(255),
            product_name VARCHAR(255),
            product_category VARCHAR(255),
            product_price NUMERIC,
            product_quantity INTEGER,
            product_brand VARCHAR(255),
            total_amount NUMERIC,
            currency VARCHAR(255),
            customer_id VARCHAR(255),
            transaction_date TIMESTAMPTZ,
            payment_method VARCHAR(255)
        )",
        "CREATE TABLE IF NOT EXISTS sales_per_category (
            transaction_date DATE,
            category VARCHAR(255),
            total_sales NUMERIC,
            PRIMARY KEY (transaction_date, category)
        )",
        "CREATE TABLE IF NOT EXISTS sales_per_day (
            transaction_date DATE PRIMARY KEY,
            total_sales NUMERIC
        )",
        "CREATE TABLE IF NOT EXISTS sales_per_month (
            year INTEGER,
            month INTEGER,
            total_sales NUMERIC,
            PRIMARY KEY (year, month)
        )",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await.map_err(classify)?;
    }

    info!("pipeline schema ready");
    Ok(())
}

/// Map a sqlx failure onto the retry taxonomy.
///
/// Connection-level trouble is worth retrying with the same batch; anything
/// the database itself rejected will fail the same way again.
fn classify(err: sqlx::Error) -> SinkError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Tls(_) => SinkError::Transient(err.to_string()),
        sqlx::Error::Database(db) => SinkError::Permanent(db.to_string()),
        sqlx::Error::Configuration(_)
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => SinkError::Permanent(err.to_string()),
        _ => SinkError::Transient(err.to_string()),
    }
}

/// Upserts raw transactions keyed by transaction_id
pub struct TransactionsWriter {
    pool: PgPool,
}

impl TransactionsWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UpsertWriter<Transaction> for TransactionsWriter {
    async fn write_batch(&self, batch: &[Transaction]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        for record in batch {
            sqlx::query(
                "INSERT INTO transactions (transaction_id, product_id, product_name, \
                 product_category, product_price, product_quantity, product_brand, total_amount, \
                 currency, customer_id, transaction_date, payment_method) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 ON CONFLICT (transaction_id) DO UPDATE SET \
                 product_id = EXCLUDED.product_id, \
                 product_name = EXCLUDED.product_name, \
                 product_category = EXCLUDED.product_category, \
                 product_price = EXCLUDED.product_price, \
                 product_quantity = EXCLUDED.product_quantity, \
                 product_brand = EXCLUDED.product_brand, \
                 total_amount = EXCLUDED.total_amount, \
                 currency = EXCLUDED.currency, \
                 customer_id = EXCLUDED.customer_id, \
                 transaction_date = EXCLUDED.transaction_date, \
                 payment_method = EXCLUDED.payment_method",
            )
            .bind(&record.transaction_id)
            .bind(&record.product_id)
            .bind(&record.product_name)
            .bind(&record.product_category)
            .bind(&record.product_price)
            .bind(record.product_quantity)
            .bind(&record.product_brand)
            .bind(&record.total_amount)
            .bind(&record.currency)
            .bind(&record.customer_id)
            .bind(record.transaction_date)
            .bind(&record.payment_method)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)
    }
}

/// Upserts per-category running totals keyed by (transaction_date, category)
pub struct CategorySalesWriter {
    pool: PgPool,
}

impl CategorySalesWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UpsertWriter<CategorySales> for CategorySalesWriter {
    async fn write_batch(&self, batch: &[CategorySales]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        for record in batch {
            sqlx::query(
                "INSERT INTO sales_per_category (transaction_date, category, total_sales) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (transaction_date, category) DO UPDATE SET \
                 total_sales = EXCLUDED.total_sales",
            )
            .bind(record.transaction_date)
            .bind(&record.category)
            .bind(&record.total_sales)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)
    }
}

/// Upserts per-day running totals keyed by transaction_date
pub struct DailySalesWriter {
    pool: PgPool,
}

impl DailySalesWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UpsertWriter<DailySales> for DailySalesWriter {
    async fn write_batch(&self, batch: &[DailySales]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        for record in batch {
            sqlx::query(
                "INSERT INTO sales_per_day (transaction_date, total_sales) \
                 VALUES ($1, $2) \
                 ON CONFLICT (transaction_date) DO UPDATE SET \
                 total_sales = EXCLUDED.total_sales",
            )
            .bind(record.transaction_date)
            .bind(&record.total_sales)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)
    }
}

/// Upserts per-month running totals keyed by the full (year, month) pair
pub struct MonthlySalesWriter {
    pool: PgPool,
}

impl MonthlySalesWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UpsertWriter<MonthlySales> for MonthlySalesWriter {
    async fn write_batch(&self, batch: &[MonthlySales]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        for record in batch {
            sqlx::query(
                "INSERT INTO sales_per_month (year, month, total_sales) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (year, month) DO UPDATE SET \
                 total_sales = EXCLUDED.total_sales",
            )
            .bind(record.year)
            .bind(record.month as i32)
            .bind(&record.total_sales)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transient() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        assert!(classify(err).is_transient());
    }

    #[test]
    fn pool_timeouts_are_transient() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn column_mismatches_are_permanent() {
        let err = sqlx::Error::ColumnNotFound("total_sales".to_string());
        assert!(!classify(err).is_transient());
    }
}
