//! Run configuration
//!
//! Values come from the environment (a `.env` file is honoured by the binary)
//! and are then overridden by command-line flags.

use anyhow::{Context, Result};
use std::path::PathBuf;

pub const DEFAULT_INPUT: &str = "data/online_retail_II.csv";
pub const DEFAULT_DB_URL: &str = "sqlite://online_retail.db";
pub const DEFAULT_EXPORT_DIR: &str = "exports";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub input_path: PathBuf,
    pub database_url: String,
    pub export_dir: PathBuf,
    /// Encoding label for CSV input; auto-detected when unset
    pub input_encoding: Option<String>,
    /// Workbook sheet to read; every sheet when unset
    pub sheet: Option<String>,
    /// Clean, build and resolve without touching the store
    pub dry_run: bool,
    pub export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from(DEFAULT_INPUT),
            database_url: DEFAULT_DB_URL.to_string(),
            export_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            input_encoding: None,
            sheet: None,
            dry_run: false,
            export: true,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let dry_run = match lookup("WAREHOUSE_DRY_RUN").and_then(non_empty) {
            Some(v) => v
                .parse::<bool>()
                .with_context(|| format!("WAREHOUSE_DRY_RUN must be true or false, got '{}'", v))?,
            None => defaults.dry_run,
        };

        Ok(Self {
            input_path: lookup("WAREHOUSE_INPUT")
                .and_then(non_empty)
                .map(PathBuf::from)
                .unwrap_or(defaults.input_path),
            database_url: lookup("DB_URL")
                .and_then(non_empty)
                .unwrap_or(defaults.database_url),
            export_dir: lookup("EXPORT_DIR")
                .and_then(non_empty)
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            input_encoding: lookup("INPUT_ENCODING").and_then(non_empty),
            sheet: lookup("INPUT_SHEET").and_then(non_empty),
            dry_run,
            export: defaults.export,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("WAREHOUSE_INPUT", "/data/retail.xlsx"),
            ("DB_URL", "sqlite:///tmp/w.db"),
            ("EXPORT_DIR", "/tmp/out"),
            ("INPUT_ENCODING", "latin1"),
            ("INPUT_SHEET", "Year 2010-2011"),
            ("WAREHOUSE_DRY_RUN", "true"),
        ]))
        .unwrap();
        assert_eq!(config.input_path, PathBuf::from("/data/retail.xlsx"));
        assert_eq!(config.database_url, "sqlite:///tmp/w.db");
        assert_eq!(config.export_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.input_encoding.as_deref(), Some("latin1"));
        assert_eq!(config.sheet.as_deref(), Some("Year 2010-2011"));
        assert!(config.dry_run);
    }

    #[test]
    fn test_blank_values_fall_back() {
        let config = Config::from_lookup(lookup(&[("DB_URL", "  "), ("INPUT_ENCODING", "")])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DB_URL);
        assert_eq!(config.input_encoding, None);
    }

    #[test]
    fn test_bad_dry_run_flag() {
        assert!(Config::from_lookup(lookup(&[("WAREHOUSE_DRY_RUN", "maybe")])).is_err());
    }
}
