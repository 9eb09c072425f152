//! Domain types for the commerce pipeline
//!
//! Defines the `Transaction` event consumed from the transaction log, the
//! running aggregate records derived from it, and payload decoding with
//! field validation. Everything downstream (aggregators, sinks, the search
//! index) works in terms of these types.

pub mod aggregates;
pub mod transaction;

pub use aggregates::{CategorySales, DailySales, MonthKey, MonthlySales};
pub use transaction::{DecodeError, IngestedTransaction, Transaction};
