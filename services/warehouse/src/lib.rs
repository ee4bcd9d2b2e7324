//! Retail warehouse builder - turns a raw invoice-line export into a star schema
//!
//! Stages, in order:
//! - [`input`]: read CSV/Excel exports into raw text records
//! - [`cleaner`]: validate rows and derive dates, revenue and return flags
//! - [`dimensions`]: distinct customers, products, countries and days with surrogate keys
//! - [`resolver`]: fact rows keyed by those surrogate keys
//! - [`loader`]: full rebuild of the SQLite tables
//! - [`export`]: one CSV per table
//!
//! [`pipeline::run`] wires them together from a [`config::Config`].

pub mod cleaner;
pub mod config;
pub mod dimensions;
pub mod error;
pub mod export;
pub mod input;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod resolver;

pub use config::Config;
pub use error::{RowError, WarehouseError};
pub use pipeline::{run, RunSummary};
