//! Input reader - loads the raw sales export into [`RawRecord`]s
//!
//! Supports CSV (any text encoding `encoding_rs` knows) and Excel-family
//! workbooks through calamine. Columns are located by name, so column order
//! and extra columns in the export do not matter.

use crate::error::WarehouseError;
use calamine::{open_workbook_auto, Data, DataType, Reader};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Timestamp layout used when a workbook cell holds a native date value
pub const CELL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Required input columns, in the order the fields appear on [`RawRecord`]
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "Invoice",
    "StockCode",
    "Description",
    "Quantity",
    "InvoiceDate",
    "Price",
    "Customer ID",
    "Country",
];

/// One input row, every field still as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    /// Location in the source, e.g. "csv:line=5" or "xls:sheet='Year 2010-2011':row=7"
    pub location: String,
    pub invoice: String,
    pub stock_code: String,
    pub description: String,
    pub quantity: String,
    pub invoice_date: String,
    pub price: String,
    pub customer_id: String,
    pub country: String,
}

/// Everything read from the input file
#[derive(Debug, Default)]
pub struct RawTable {
    pub records: Vec<RawRecord>,
    /// Rows the reader itself could not split into fields
    pub unreadable: usize,
    /// "sha256:<hex>" of the input bytes
    pub content_hash: String,
}

// =============================================================================
// COLUMN RESOLUTION
// =============================================================================

/// Positions of the required columns inside one header row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    positions: [usize; 8],
}

fn normalize_header(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ColumnMap {
    /// Match every required column case-insensitively, ignoring surrounding whitespace
    pub fn resolve(headers: &[String]) -> Result<Self, WarehouseError> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut positions = [0usize; 8];

        for (slot, required) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
            let target = normalize_header(required);
            *slot = normalized
                .iter()
                .position(|h| *h == target)
                .ok_or_else(|| WarehouseError::MissingColumn {
                    column: required.to_string(),
                    found: headers.to_vec(),
                })?;
        }

        Ok(Self { positions })
    }

    /// Build a record from one row of cells; absent trailing cells read as empty
    fn record<'a, F>(&self, location: String, cell: F) -> RawRecord
    where
        F: Fn(usize) -> Option<&'a str>,
    {
        let [invoice, stock_code, description, quantity, invoice_date, price, customer_id, country] =
            self.positions.map(|idx| cell(idx).unwrap_or("").to_string());

        RawRecord {
            location,
            invoice,
            stock_code,
            description,
            quantity,
            invoice_date,
            price,
            customer_id,
            country,
        }
    }
}

// =============================================================================
// TEXT DECODING
// =============================================================================

/// Decode input bytes to text.
///
/// An explicit label wins. Without one, UTF-8 (BOM stripped) is tried first and
/// anything that is not valid UTF-8 is read as Windows-1252, the superset of
/// ISO-8859-1 retail exports are usually written in.
pub fn decode_text(bytes: &[u8], label: Option<&str>) -> Result<String, WarehouseError> {
    let encoding = match label {
        Some(label) => Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
            WarehouseError::UnknownEncoding {
                label: label.to_string(),
            }
        })?,
        None => {
            let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
            if !had_errors {
                return Ok(text.into_owned());
            }
            tracing::info!("input is not valid UTF-8, decoding as windows-1252");
            WINDOWS_1252
        }
    };

    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::warn!(encoding = used.name(), "input contained undecodable bytes");
    }
    Ok(text.into_owned())
}

/// SHA-256 of the raw input, formatted like "sha256:<hex>"
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

// =============================================================================
// CSV
// =============================================================================

/// Parse CSV text into raw records
pub fn parse_csv(content: &str) -> Result<RawTable, WarehouseError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| WarehouseError::InputParse {
            path: "<csv>".into(),
            message: e.to_string(),
        })?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let columns = ColumnMap::resolve(&headers)?;
    tracing::debug!(?columns, "resolved CSV columns");

    let mut table = RawTable::default();
    for (line_idx, result) in reader.records().enumerate() {
        let line_num = line_idx + 2; // +1 for 0-index, +1 for header
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line = line_num, error = %e, "skipping unreadable CSV row");
                table.unreadable += 1;
                continue;
            }
        };
        table
            .records
            .push(columns.record(format!("csv:line={}", line_num), |idx| row.get(idx)));
    }

    Ok(table)
}

// =============================================================================
// EXCEL
// =============================================================================

/// Render a workbook cell as the text the cleaner expects
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_datetime()
            .map(|dt| dt.format(CELL_TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

/// Read one or all sheets of a workbook into raw records
fn parse_workbook(path: &Path, sheet: Option<&str>) -> Result<RawTable, WarehouseError> {
    let parse_err = |message: String| WarehouseError::InputParse {
        path: path.to_path_buf(),
        message,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| parse_err(e.to_string()))?;
    let available = workbook.sheet_names().to_vec();
    if available.is_empty() {
        return Err(WarehouseError::EmptyWorkbook {
            path: path.to_path_buf(),
        });
    }

    let sheets: Vec<String> = match sheet {
        Some(name) if available.iter().any(|s| s == name) => vec![name.to_string()],
        Some(name) => {
            return Err(WarehouseError::SheetNotFound {
                sheet: name.to_string(),
                path: path.to_path_buf(),
                available,
            })
        }
        None => available,
    };

    let mut table = RawTable::default();
    for sheet_name in &sheets {
        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| parse_err(format!("sheet '{}': {}", sheet_name, e)))?;

        let mut rows = range.rows();
        let Some(header_row) = rows.next() else {
            tracing::warn!(sheet = %sheet_name, "skipping empty sheet");
            continue;
        };
        let headers: Vec<String> = header_row.iter().map(|c| cell_text(c).trim().to_string()).collect();
        let columns = ColumnMap::resolve(&headers)?;

        let before = table.records.len();
        for (row_idx, row) in rows.enumerate() {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            if cells.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            let location = format!("xls:sheet='{}':row={}", sheet_name, row_idx + 2);
            table
                .records
                .push(columns.record(location, |idx| cells.get(idx).map(String::as_str)));
        }
        tracing::info!(
            sheet = %sheet_name,
            rows = table.records.len() - before,
            "read workbook sheet"
        );
    }

    Ok(table)
}

/// Detect Excel-family input by file extension
pub fn is_excel_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("xls" | "xlsx" | "xlsm" | "xlsb" | "ods")
    )
}

/// Read the input file, whatever its format
pub fn read_input(
    path: &Path,
    encoding: Option<&str>,
    sheet: Option<&str>,
) -> Result<RawTable, WarehouseError> {
    let bytes = std::fs::read(path).map_err(|source| WarehouseError::InputRead {
        path: path.to_path_buf(),
        source,
    })?;
    let hash = content_hash(&bytes);
    tracing::info!(path = %path.display(), bytes = bytes.len(), hash = %hash, "read input");

    let mut table = if is_excel_file(path) {
        parse_workbook(path, sheet)?
    } else {
        let content = decode_text(&bytes, encoding)?;
        parse_csv(&content).map_err(|e| match e {
            WarehouseError::InputParse { message, .. } => WarehouseError::InputParse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?
    };
    table.content_hash = hash;
    Ok(table)
}

// =============================================================================
// TESTS
// =============================================================================
