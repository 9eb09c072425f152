//! Running aggregate records derived from the transaction stream
//!
//! Each record type carries the latest accumulator snapshot for one key.
//! `combine` adds one transaction's `total_amount` into the running
//! `total_sales` and keeps the most recently observed date bucket, so the
//! value written downstream is always the current state, never a delta.

use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::transaction::IngestedTransaction;

/// A calendar month that does not collapse across years.
///
/// The monthly table is keyed by the full pair so January of one year never
/// merges with January of the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }
}

/// Running sales total for one (day, category) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySales {
    pub transaction_date: NaiveDate,
    pub category: String,
    pub total_sales: BigDecimal,
}

impl CategorySales {
    pub fn key(event: &IngestedTransaction) -> (NaiveDate, String) {
        (event.day(), event.transaction.product_category.clone())
    }

    pub fn combine(existing: Option<CategorySales>, event: &IngestedTransaction) -> CategorySales {
        let running = existing.map(|c| c.total_sales).unwrap_or_else(|| BigDecimal::from(0));
        CategorySales {
            transaction_date: event.day(),
            category: event.transaction.product_category.clone(),
            total_sales: running + &event.transaction.total_amount,
        }
    }
}

/// Running sales total for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySales {
    pub transaction_date: NaiveDate,
    pub total_sales: BigDecimal,
}

impl DailySales {
    pub fn key(event: &IngestedTransaction) -> NaiveDate {
        event.day()
    }

    pub fn combine(existing: Option<DailySales>, event: &IngestedTransaction) -> DailySales {
        let running = existing.map(|d| d.total_sales).unwrap_or_else(|| BigDecimal::from(0));
        DailySales {
            transaction_date: event.day(),
            total_sales: running + &event.transaction.total_amount,
        }
    }
}

/// Running sales total for one (year, month) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySales {
    pub year: i32,
    pub month: u32,
    pub total_sales: BigDecimal,
}

impl MonthlySales {
    pub fn key(event: &IngestedTransaction) -> MonthKey {
        event.month_key()
    }

    pub fn combine(existing: Option<MonthlySales>, event: &IngestedTransaction) -> MonthlySales {
        let key = event.month_key();
        let running = existing.map(|m| m.total_sales).unwrap_or_else(|| BigDecimal::from(0));
        MonthlySales { year: key.year, month: key.month, total_sales: running + &event.transaction.total_amount }
    }
}
