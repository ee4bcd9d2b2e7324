//! Warehouse loader - rebuilds the SQLite star schema from scratch
//!
//! Every run drops the five tables and writes them again. There is no
//! incremental mode: the destination is only valid once `rebuild` returns Ok.

use crate::dimensions::Dimensions;
use crate::error::WarehouseError;
use crate::resolver::FactRow;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

/// Text layout of `fact_sales.invoice_datetime`
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Text layout of `dim_date.full_date`
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Tables in the order they are exported
pub const TABLES: [&str; 5] = ["dim_date", "dim_customer", "dim_product", "dim_country", "fact_sales"];

/// Fact table first so no foreign key is left dangling
const DROP_STATEMENTS: &[&str] = &[
    "DROP TABLE IF EXISTS fact_sales",
    "DROP TABLE IF EXISTS dim_date",
    "DROP TABLE IF EXISTS dim_country",
    "DROP TABLE IF EXISTS dim_product",
    "DROP TABLE IF EXISTS dim_customer",
];

const CREATE_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE dim_customer (
      customer_key INTEGER PRIMARY KEY,
      customer_id TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE dim_product (
      product_key INTEGER PRIMARY KEY,
      stock_code TEXT NOT NULL,
      description TEXT NOT NULL,
      UNIQUE(stock_code, description)
    )
    "#,
    r#"
    CREATE TABLE dim_country (
      country_key INTEGER PRIMARY KEY,
      country TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE dim_date (
      date_key INTEGER PRIMARY KEY,
      full_date TEXT NOT NULL UNIQUE,
      year INTEGER NOT NULL,
      month INTEGER NOT NULL,
      month_name TEXT NOT NULL,
      quarter INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE fact_sales (
      line_id INTEGER PRIMARY KEY,
      invoice_no TEXT NOT NULL,
      invoice_datetime TEXT NOT NULL,
      date_key INTEGER,
      customer_key INTEGER,
      product_key INTEGER,
      country_key INTEGER,
      quantity INTEGER NOT NULL,
      unit_price REAL NOT NULL,
      revenue REAL NOT NULL,
      is_return INTEGER NOT NULL,
      FOREIGN KEY(date_key) REFERENCES dim_date(date_key),
      FOREIGN KEY(customer_key) REFERENCES dim_customer(customer_key),
      FOREIGN KEY(product_key) REFERENCES dim_product(product_key),
      FOREIGN KEY(country_key) REFERENCES dim_country(country_key)
    )
    "#,
];

/// Sanity counts read back from the store after a load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub fact_rows: i64,
    pub return_rows: i64,
    pub sale_rows: i64,
    pub customer_rows: i64,
    pub product_rows: i64,
    pub country_rows: i64,
    pub date_rows: i64,
}

/// Handle on the destination store
#[derive(Clone)]
pub struct Warehouse {
    pool: SqlitePool,
}

impl Warehouse {
    /// Open (creating if missing) the SQLite database at `url`
    pub async fn connect(url: &str) -> Result<Self, WarehouseError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, kept alive for the life of the handle
    pub async fn in_memory() -> Result<Self, WarehouseError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drop, recreate and fill all five tables in one transaction
    pub async fn rebuild(&self, dims: &Dimensions, facts: &[FactRow]) -> Result<(), WarehouseError> {
        let mut tx = self.pool.begin().await?;

        tracing::info!("creating schema");
        for stmt in DROP_STATEMENTS.iter().chain(CREATE_STATEMENTS) {
            sqlx::query(stmt).execute(&mut *tx).await?;
        }

        tracing::info!("loading dimensions");
        insert_dimensions(&mut tx, dims).await?;

        tracing::info!(rows = facts.len(), "loading fact table");
        for fact in facts {
            insert_fact(&mut tx, fact).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Row counts of every table plus the return split of the fact table
    pub async fn load_report(&self) -> Result<LoadReport, WarehouseError> {
        let count = |table: &str| format!("SELECT COUNT(*) FROM {}", table);

        let mut report = LoadReport {
            fact_rows: self.scalar(&count("fact_sales")).await?,
            customer_rows: self.scalar(&count("dim_customer")).await?,
            product_rows: self.scalar(&count("dim_product")).await?,
            country_rows: self.scalar(&count("dim_country")).await?,
            date_rows: self.scalar(&count("dim_date")).await?,
            ..Default::default()
        };

        let split: Vec<(i64, i64)> =
            sqlx::query_as("SELECT is_return, COUNT(*) FROM fact_sales GROUP BY is_return")
                .fetch_all(&self.pool)
                .await?;
        for (is_return, n) in split {
            if is_return != 0 {
                report.return_rows = n;
            } else {
                report.sale_rows = n;
            }
        }

        Ok(report)
    }

    async fn scalar(&self, sql: &str) -> Result<i64, WarehouseError> {
        let (n,): (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(n)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn insert_dimensions(
    tx: &mut Transaction<'_, Sqlite>,
    dims: &Dimensions,
) -> Result<(), WarehouseError> {
    for (key, customer_id) in dims.customers.iter() {
        sqlx::query("INSERT INTO dim_customer (customer_key, customer_id) VALUES (?, ?)")
            .bind(key)
            .bind(customer_id)
            .execute(&mut **tx)
            .await?;
    }

    for (key, product) in dims.products.iter() {
        sqlx::query("INSERT INTO dim_product (product_key, stock_code, description) VALUES (?, ?, ?)")
            .bind(key)
            .bind(&product.stock_code)
            .bind(&product.description)
            .execute(&mut **tx)
            .await?;
    }

    for (key, country) in dims.countries.iter() {
        sqlx::query("INSERT INTO dim_country (country_key, country) VALUES (?, ?)")
            .bind(key)
            .bind(country)
            .execute(&mut **tx)
            .await?;
    }

    for (key, parts) in dims.date_rows() {
        sqlx::query(
            r#"
            INSERT INTO dim_date (date_key, full_date, year, month, month_name, quarter)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(parts.full_date.format(DATE_FORMAT).to_string())
        .bind(parts.year)
        .bind(parts.month as i64)
        .bind(&parts.month_name)
        .bind(parts.quarter as i64)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Nearest REAL to an exact decimal. Parsing the decimal text rounds once,
/// which `ToPrimitive::to_f64` does not guarantee.
fn to_real(value: Decimal) -> Result<f64, WarehouseError> {
    value
        .to_string()
        .parse::<f64>()
        .map_err(|_| WarehouseError::UnrepresentableDecimal {
            value: value.to_string(),
        })
}

async fn insert_fact(tx: &mut Transaction<'_, Sqlite>, fact: &FactRow) -> Result<(), WarehouseError> {
    let unit_price = to_real(fact.unit_price)?;
    let revenue = to_real(fact.revenue)?;
    sqlx::query(
        r#"
        INSERT INTO fact_sales
        (line_id, invoice_no, invoice_datetime, date_key, customer_key, product_key, country_key,
         quantity, unit_price, revenue, is_return)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(fact.line_id)
    .bind(&fact.invoice_no)
    .bind(fact.invoice_datetime.format(DATETIME_FORMAT).to_string())
    .bind(fact.date_key)
    .bind(fact.customer_key)
    .bind(fact.product_key)
    .bind(fact.country_key)
    .bind(fact.quantity)
    .bind(unit_price)
    .bind(revenue)
    .bind(fact.is_return as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::clean_records;
    use crate::input::RawRecord;
    use crate::resolver::resolve_facts;

    fn raw(stock: &str, desc: &str, qty: &str, customer: &str) -> RawRecord {
        RawRecord {
            location: "test".to_string(),
            invoice: "536365".to_string(),
            stock_code: stock.to_string(),
            description: desc.to_string(),
            quantity: qty.to_string(),
            invoice_date: "2010-12-01 08:26".to_string(),
            price: "3.39".to_string(),
            customer_id: customer.to_string(),
            country: "United Kingdom".to_string(),
        }
    }

    fn build() -> (Dimensions, Vec<FactRow>) {
        let cleaned = clean_records(vec![
            raw("71053", "WHITE METAL LANTERN", "6", "17850"),
            raw("71053", "WHITE METAL LANTERN ", "-6", "17850.0"),
            raw("84406B", "CREAM CUPID HEARTS COAT HANGER", "8", ""),
        ])
        .records;
        let dims = Dimensions::build(&cleaned);
        let facts = resolve_facts(cleaned, &dims).facts;
        (dims, facts)
    }

    // -------------------------------------------------------------------------
    // LOAD TESTS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_rebuild_and_report() {
        let wh = Warehouse::in_memory().await.unwrap();
        let (dims, facts) = build();
        wh.rebuild(&dims, &facts).await.unwrap();

        let report = wh.load_report().await.unwrap();
        assert_eq!(
            report,
            LoadReport {
                fact_rows: 3,
                return_rows: 1,
                sale_rows: 2,
                customer_rows: 2,
                product_rows: 2,
                country_rows: 1,
                date_rows: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_contents() {
        let wh = Warehouse::in_memory().await.unwrap();
        let (dims, facts) = build();
        wh.rebuild(&dims, &facts).await.unwrap();
        let first = wh.load_report().await.unwrap();
        wh.rebuild(&dims, &facts).await.unwrap();
        let second = wh.load_report().await.unwrap();
        assert_eq!(first, second);

        let empty = Dimensions::default();
        wh.rebuild(&empty, &[]).await.unwrap();
        assert_eq!(wh.load_report().await.unwrap(), LoadReport::default());
    }

    #[tokio::test]
    async fn test_stored_values() {
        let wh = Warehouse::in_memory().await.unwrap();
        let (dims, facts) = build();
        wh.rebuild(&dims, &facts).await.unwrap();

        let row: (String, String, f64, f64, i64) = sqlx::query_as(
            "SELECT invoice_no, invoice_datetime, unit_price, revenue, is_return FROM fact_sales WHERE line_id = 1",
        )
        .fetch_one(wh.pool())
        .await
        .unwrap();
        assert_eq!(row.0, "536365");
        assert_eq!(row.1, "2010-12-01 08:26:00");
        assert_eq!(row.2, 3.39);
        assert_eq!(row.3, 20.34);
        assert_eq!(row.4, 0);

        let date: (String, i64, i64, String, i64) =
            sqlx::query_as("SELECT full_date, year, month, month_name, quarter FROM dim_date")
                .fetch_one(wh.pool())
                .await
                .unwrap();
        assert_eq!(date, ("2010-12-01".to_string(), 2010, 12, "Dec".to_string(), 4));
    }

    #[tokio::test]
    async fn test_every_fact_key_exists_in_its_dimension() {
        let wh = Warehouse::in_memory().await.unwrap();
        let (dims, facts) = build();
        wh.rebuild(&dims, &facts).await.unwrap();

        let (orphans,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM fact_sales f
            LEFT JOIN dim_date d ON f.date_key = d.date_key
            LEFT JOIN dim_customer c ON f.customer_key = c.customer_key
            LEFT JOIN dim_product p ON f.product_key = p.product_key
            LEFT JOIN dim_country k ON f.country_key = k.country_key
            WHERE d.date_key IS NULL OR c.customer_key IS NULL
               OR p.product_key IS NULL OR k.country_key IS NULL
            "#,
        )
        .fetch_one(wh.pool())
        .await
        .unwrap();
        assert_eq!(orphans, 0);
    }

    // -------------------------------------------------------------------------
    // REAL CONVERSION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_to_real_rounds_once() {
        assert_eq!(to_real(Decimal::from_str("20.34").unwrap()).unwrap(), 20.34);
        assert_eq!(to_real(Decimal::from_str("-27.50").unwrap()).unwrap(), -27.5);
        assert_eq!(to_real(Decimal::from_str("0.1").unwrap()).unwrap(), 0.1);
    }

    #[test]
    fn test_to_real_extremes_are_finite() {
        let max = to_real(Decimal::MAX).unwrap();
        let min = to_real(Decimal::MIN).unwrap();
        assert!(max.is_finite() && max > 7.9e28);
        assert!(min.is_finite() && min < -7.9e28);
    }
}
