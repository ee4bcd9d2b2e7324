//! Error types for the warehouse build.
//!
//! Two families: [`WarehouseError`] aborts the run, [`RowError`] only drops
//! the offending input row.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors: schema, input-file and destination failures.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Required column absent from the input header.
    #[error("missing column '{column}'. Found: {found:?}")]
    MissingColumn { column: String, found: Vec<String> },

    #[error("failed to read input {path}: {source}")]
    InputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse input {path}: {message}")]
    InputParse { path: PathBuf, message: String },

    #[error("unknown input encoding label '{label}'")]
    UnknownEncoding { label: String },

    #[error("workbook {path} has no sheets")]
    EmptyWorkbook { path: PathBuf },

    #[error("sheet '{sheet}' not found in {path}. Available: {available:?}")]
    SheetNotFound {
        sheet: String,
        path: PathBuf,
        available: Vec<String>,
    },

    /// Destination store unavailable or rejected a write.
    #[error("warehouse store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("decimal {value} has no REAL representation")]
    UnrepresentableDecimal { value: String },

    #[error("failed to export {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Per-row data errors. The row is skipped and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("malformed timestamp '{value}'")]
    MalformedTimestamp { value: String },

    #[error("malformed {field} '{value}'")]
    MalformedNumeric { field: &'static str, value: String },

    #[error("invalid quantity {quantity} or price {price}")]
    InvalidQuantityOrPrice { quantity: i64, price: String },
}

/// The four dimensions a fact row references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Date,
    Customer,
    Product,
    Country,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Date,
        Dimension::Customer,
        Dimension::Product,
        Dimension::Country,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Dimension::Date => "dim_date",
            Dimension::Customer => "dim_customer",
            Dimension::Product => "dim_product",
            Dimension::Country => "dim_country",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Fact rows whose natural key had no entry in a dimension.
///
/// This is never caused by bad input: the dimensions are built from the same
/// cleaned records, so a miss means the builder and resolver disagree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{count} fact rows have no {dimension} key")]
pub struct UnresolvedDimensionKey {
    pub dimension: Dimension,
    pub count: usize,
}
