//! Flat-file export of the warehouse tables
//!
//! One CSV per table, header first, columns in schema order, rows in primary
//! key order. Rows are read back from the store so the files match what was
//! committed.

use crate::error::WarehouseError;
use crate::loader::Warehouse;
use std::path::{Path, PathBuf};

const DIM_DATE_HEADER: [&str; 6] = ["date_key", "full_date", "year", "month", "month_name", "quarter"];
const DIM_CUSTOMER_HEADER: [&str; 2] = ["customer_key", "customer_id"];
const DIM_PRODUCT_HEADER: [&str; 3] = ["product_key", "stock_code", "description"];
const DIM_COUNTRY_HEADER: [&str; 2] = ["country_key", "country"];
const FACT_SALES_HEADER: [&str; 11] = [
    "line_id",
    "invoice_no",
    "invoice_datetime",
    "date_key",
    "customer_key",
    "product_key",
    "country_key",
    "quantity",
    "unit_price",
    "revenue",
    "is_return",
];

type FactSalesRow = (
    i64,
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    i64,
    f64,
    f64,
    i64,
);

fn opt(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write header + rows to `<dir>/<table>.csv`
fn write_table<I, R>(dir: &Path, table: &str, header: &[&str], rows: I) -> Result<PathBuf, WarehouseError>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let path = dir.join(format!("{}.csv", table));
    let export_err = |source: csv::Error| WarehouseError::Export {
        path: path.clone(),
        source,
    };

    let mut writer = csv::Writer::from_path(&path).map_err(export_err)?;
    writer.write_record(header).map_err(export_err)?;
    for row in rows {
        writer.write_record(row).map_err(export_err)?;
    }
    writer
        .flush()
        .map_err(|e| export_err(csv::Error::from(e)))?;

    tracing::info!(path = %path.display(), "exported table");
    Ok(path)
}

/// Export all five tables into `dir`, creating it if needed
pub async fn export_tables(warehouse: &Warehouse, dir: &Path) -> Result<Vec<PathBuf>, WarehouseError> {
    std::fs::create_dir_all(dir).map_err(|e| WarehouseError::Export {
        path: dir.to_path_buf(),
        source: csv::Error::from(e),
    })?;
    let pool = warehouse.pool();
    let mut written = Vec::with_capacity(5);

    let dates: Vec<(i64, String, i64, i64, String, i64)> = sqlx::query_as(
        "SELECT date_key, full_date, year, month, month_name, quarter FROM dim_date ORDER BY date_key",
    )
    .fetch_all(pool)
    .await?;
    written.push(write_table(
        dir,
        "dim_date",
        &DIM_DATE_HEADER,
        dates.into_iter().map(|(key, day, year, month, name, quarter)| {
            [key.to_string(), day, year.to_string(), month.to_string(), name, quarter.to_string()]
        }),
    )?);

    let customers: Vec<(i64, String)> =
        sqlx::query_as("SELECT customer_key, customer_id FROM dim_customer ORDER BY customer_key")
            .fetch_all(pool)
            .await?;
    written.push(write_table(
        dir,
        "dim_customer",
        &DIM_CUSTOMER_HEADER,
        customers.into_iter().map(|(key, id)| [key.to_string(), id]),
    )?);

    let products: Vec<(i64, String, String)> = sqlx::query_as(
        "SELECT product_key, stock_code, description FROM dim_product ORDER BY product_key",
    )
    .fetch_all(pool)
    .await?;
    written.push(write_table(
        dir,
        "dim_product",
        &DIM_PRODUCT_HEADER,
        products
            .into_iter()
            .map(|(key, code, desc)| [key.to_string(), code, desc]),
    )?);

    let countries: Vec<(i64, String)> =
        sqlx::query_as("SELECT country_key, country FROM dim_country ORDER BY country_key")
            .fetch_all(pool)
            .await?;
    written.push(write_table(
        dir,
        "dim_country",
        &DIM_COUNTRY_HEADER,
        countries.into_iter().map(|(key, name)| [key.to_string(), name]),
    )?);

    let facts: Vec<FactSalesRow> = sqlx::query_as(
        r#"
        SELECT line_id, invoice_no, invoice_datetime, date_key, customer_key, product_key,
               country_key, quantity, unit_price, revenue, is_return
        FROM fact_sales ORDER BY line_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    written.push(write_table(
        dir,
        "fact_sales",
        &FACT_SALES_HEADER,
        facts.into_iter().map(
            |(line, invoice, datetime, date, customer, product, country, qty, price, revenue, ret)| {
                [
                    line.to_string(),
                    invoice,
                    datetime,
                    opt(date),
                    opt(customer),
                    opt(product),
                    opt(country),
                    qty.to_string(),
                    price.to_string(),
                    revenue.to_string(),
                    ret.to_string(),
                ]
            },
        ),
    )?);

    Ok(written)
}

// =============================================================================
// TESTS
// =============================================================================
