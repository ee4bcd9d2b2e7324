//! Record cleaner - validates raw rows and derives the analytic fields
//!
//! Rules run in a fixed order: timestamp, numerics, quantity/price sanity,
//! text trimming, customer normalization, date parts, revenue. A row failing
//! any of the first three rules is dropped and counted; nothing here aborts
//! the run.

use crate::error::RowError;
use crate::input::RawRecord;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

/// Customer id assigned to rows without a usable identifier
pub const GUEST_CUSTOMER: &str = "GUEST";

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Calendar attributes of one invoice day
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateParts {
    pub full_date: NaiveDate,
    pub year: i32,
    pub month: u32,
    /// Three-letter abbreviation, e.g. "Dec"
    pub month_name: String,
    pub quarter: u32,
}

impl DateParts {
    pub fn from_date(full_date: NaiveDate) -> Self {
        let month = full_date.month();
        Self {
            full_date,
            year: full_date.year(),
            month,
            month_name: full_date.format("%b").to_string(),
            quarter: (month - 1) / 3 + 1,
        }
    }
}

/// A validated sales line
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedRecord {
    pub location: String,
    pub invoice_no: String,
    pub invoice_datetime: NaiveDateTime,
    pub stock_code: String,
    pub description: String,
    pub country: String,
    pub customer_id: String,
    pub date: DateParts,
    /// Never zero; negative for returns
    pub quantity: i64,
    /// Always strictly positive
    pub unit_price: Decimal,
    pub revenue: Decimal,
    pub is_return: bool,
}

/// Per-rule drop counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleaningStats {
    pub rows_in: usize,
    pub kept: usize,
    pub malformed_timestamp: usize,
    pub malformed_numeric: usize,
    pub zero_quantity: usize,
    pub non_positive_price: usize,
}

impl CleaningStats {
    pub fn dropped(&self) -> usize {
        self.malformed_timestamp + self.malformed_numeric + self.zero_quantity + self.non_positive_price
    }

    fn record_drop(&mut self, err: &RowError) {
        match err {
            RowError::MalformedTimestamp { .. } => self.malformed_timestamp += 1,
            RowError::MalformedNumeric { .. } => self.malformed_numeric += 1,
            RowError::InvalidQuantityOrPrice { quantity: 0, .. } => self.zero_quantity += 1,
            RowError::InvalidQuantityOrPrice { .. } => self.non_positive_price += 1,
        }
    }
}

/// Output of the cleaning stage
#[derive(Debug, Default)]
pub struct CleanOutput {
    pub records: Vec<CleanedRecord>,
    pub stats: CleaningStats,
}

// =============================================================================
// FIELD PARSERS
// =============================================================================

/// Parse an invoice timestamp in any of the accepted layouts
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    let value = value.trim();
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

/// Quantities must be whole numbers; "6" and "6.0" both read as 6
pub fn parse_quantity(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(q) = value.parse::<i64>() {
        return Some(q);
    }
    let d = parse_decimal(value)?;
    if d.fract().is_zero() {
        d.to_i64()
    } else {
        None
    }
}

/// Canonical customer id: the integer part of a numeric id, else [`GUEST_CUSTOMER`]
pub fn normalize_customer_id(value: &str) -> String {
    match parse_decimal(value) {
        Some(d) => d.trunc().normalize().to_string(),
        None => GUEST_CUSTOMER.to_string(),
    }
}

// =============================================================================
// CLEANING
// =============================================================================

/// Apply every cleaning rule to one row
pub fn clean_record(raw: RawRecord) -> Result<CleanedRecord, RowError> {
    let invoice_datetime =
        parse_timestamp(&raw.invoice_date).ok_or_else(|| RowError::MalformedTimestamp {
            value: raw.invoice_date.clone(),
        })?;

    let quantity = parse_quantity(&raw.quantity).ok_or_else(|| RowError::MalformedNumeric {
        field: "quantity",
        value: raw.quantity.clone(),
    })?;
    let unit_price = parse_decimal(&raw.price).ok_or_else(|| RowError::MalformedNumeric {
        field: "price",
        value: raw.price.clone(),
    })?;

    if quantity == 0 || unit_price <= Decimal::ZERO {
        return Err(RowError::InvalidQuantityOrPrice {
            quantity,
            price: unit_price.to_string(),
        });
    }

    let revenue = Decimal::from(quantity)
        .checked_mul(unit_price)
        .ok_or_else(|| RowError::MalformedNumeric {
            field: "revenue",
            value: format!("{} * {}", quantity, unit_price),
        })?;

    Ok(CleanedRecord {
        invoice_no: raw.invoice.trim().to_string(),
        stock_code: raw.stock_code.trim().to_string(),
        description: raw.description.trim().to_string(),
        country: raw.country.trim().to_string(),
        customer_id: normalize_customer_id(&raw.customer_id),
        date: DateParts::from_date(invoice_datetime.date()),
        invoice_datetime,
        quantity,
        unit_price,
        revenue,
        is_return: quantity < 0,
        location: raw.location,
    })
}

/// Clean every row, dropping and counting the invalid ones
pub fn clean_records(raw: Vec<RawRecord>) -> CleanOutput {
    let mut out = CleanOutput {
        records: Vec::with_capacity(raw.len()),
        stats: CleaningStats {
            rows_in: raw.len(),
            ..Default::default()
        },
    };

    for record in raw {
        let location = record.location.clone();
        match clean_record(record) {
            Ok(cleaned) => out.records.push(cleaned),
            Err(err) => {
                tracing::debug!(%location, error = %err, "dropping row");
                out.stats.record_drop(&err);
            }
        }
    }
    out.stats.kept = out.records.len();

    tracing::info!(
        rows_in = out.stats.rows_in,
        kept = out.stats.kept,
        malformed_timestamp = out.stats.malformed_timestamp,
        malformed_numeric = out.stats.malformed_numeric,
        zero_quantity = out.stats.zero_quantity,
        non_positive_price = out.stats.non_positive_price,
        "cleaned records"
    );
    out
}

// =============================================================================
// TESTS
// =============================================================================
