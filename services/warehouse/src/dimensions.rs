//! Dimension builder - distinct natural keys and their surrogate keys
//!
//! Each dimension is a [`KeyRegistry`]: an insertion-ordered lookup table that
//! hands out the next surrogate key the first time a natural key is seen and
//! returns the existing key afterwards.

use crate::cleaner::{CleanedRecord, DateParts};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

/// Integer key stored in the warehouse tables
pub type SurrogateKey = i64;

/// Natural key of the product dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductKey {
    pub stock_code: String,
    pub description: String,
}

impl ProductKey {
    pub fn of(record: &CleanedRecord) -> Self {
        Self {
            stock_code: record.stock_code.clone(),
            description: record.description.clone(),
        }
    }
}

/// Insertion-ordered natural key -> surrogate key table
#[derive(Debug, Clone)]
pub struct KeyRegistry<K> {
    keys: HashMap<K, SurrogateKey>,
    entries: Vec<K>,
}

impl<K> Default for KeyRegistry<K> {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyRegistry<K> {
    /// Get the key for `natural`, assigning the next one if absent
    pub fn get_or_insert(&mut self, natural: &K) -> SurrogateKey {
        if let Some(&key) = self.keys.get(natural) {
            return key;
        }
        self.entries.push(natural.clone());
        let key = self.entries.len() as SurrogateKey;
        self.keys.insert(natural.clone(), key);
        key
    }

    pub fn get(&self, natural: &K) -> Option<SurrogateKey> {
        self.keys.get(natural).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order, starting at 1
    pub fn iter(&self) -> impl Iterator<Item = (SurrogateKey, &K)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, natural)| (idx as SurrogateKey + 1, natural))
    }
}

/// The four dimensions of the sales star
#[derive(Debug, Clone, Default)]
pub struct Dimensions {
    pub customers: KeyRegistry<String>,
    pub products: KeyRegistry<ProductKey>,
    pub countries: KeyRegistry<String>,
    pub dates: KeyRegistry<NaiveDate>,
}

/// Row counts per dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DimensionCounts {
    pub customers: usize,
    pub products: usize,
    pub countries: usize,
    pub dates: usize,
}

impl Dimensions {
    /// Single pass over the cleaned records, first-seen order
    pub fn build(records: &[CleanedRecord]) -> Self {
        let mut dims = Self::default();
        for record in records {
            dims.customers.get_or_insert(&record.customer_id);
            dims.products.get_or_insert(&ProductKey::of(record));
            dims.countries.get_or_insert(&record.country);
            dims.dates.get_or_insert(&record.date.full_date);
        }

        tracing::info!(
            customers = dims.customers.len(),
            products = dims.products.len(),
            countries = dims.countries.len(),
            dates = dims.dates.len(),
            "built dimensions"
        );
        dims
    }

    pub fn counts(&self) -> DimensionCounts {
        DimensionCounts {
            customers: self.customers.len(),
            products: self.products.len(),
            countries: self.countries.len(),
            dates: self.dates.len(),
        }
    }

    /// Date entries with their denormalized calendar attributes
    pub fn date_rows(&self) -> impl Iterator<Item = (SurrogateKey, DateParts)> + '_ {
        self.dates
            .iter()
            .map(|(key, day)| (key, DateParts::from_date(*day)))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::clean_record;
    use crate::input::RawRecord;

    fn record(stock: &str, desc: &str, customer: &str, country: &str, date: &str) -> CleanedRecord {
        clean_record(RawRecord {
            location: "test".to_string(),
            invoice: "1".to_string(),
            stock_code: stock.to_string(),
            description: desc.to_string(),
            quantity: "1".to_string(),
            invoice_date: date.to_string(),
            price: "1.00".to_string(),
            customer_id: customer.to_string(),
            country: country.to_string(),
        })
        .unwrap()
    }

    // -------------------------------------------------------------------------
    // REGISTRY TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_registry_first_seen_order() {
        let mut reg = KeyRegistry::default();
        assert_eq!(reg.get_or_insert(&"b".to_string()), 1);
        assert_eq!(reg.get_or_insert(&"a".to_string()), 2);
        assert_eq!(reg.get_or_insert(&"b".to_string()), 1);
        assert_eq!(reg.len(), 2);
        let entries: Vec<_> = reg.iter().map(|(k, v)| (k, v.as_str())).collect();
        assert_eq!(entries, vec![(1, "b"), (2, "a")]);
    }

    #[test]
    fn test_registry_get_missing() {
        let reg: KeyRegistry<String> = KeyRegistry::default();
        assert!(reg.is_empty());
        assert_eq!(reg.get(&"x".to_string()), None);
    }

    // -------------------------------------------------------------------------
    // DIMENSION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_product_natural_key_is_pair() {
        let records = vec![
            record("85123A", "WHITE HANGING HEART T-LIGHT HOLDER", "1", "UK", "2010-12-01 08:26"),
            record("85123A", "CREAM HANGING HEART T-LIGHT HOLDER", "1", "UK", "2010-12-01 08:26"),
            record("85123A", "WHITE HANGING HEART T-LIGHT HOLDER", "2", "UK", "2010-12-02 08:26"),
        ];
        let dims = Dimensions::build(&records);
        assert_eq!(dims.products.len(), 2);
        assert_ne!(
            dims.products.get(&ProductKey::of(&records[0])),
            dims.products.get(&ProductKey::of(&records[1]))
        );
        assert_eq!(
            dims.products.get(&ProductKey::of(&records[0])),
            dims.products.get(&ProductKey::of(&records[2]))
        );
    }

    #[test]
    fn test_date_dimension_is_per_day() {
        let records = vec![
            record("1", "A", "1", "UK", "2010-12-01 08:26"),
            record("1", "A", "1", "UK", "2010-12-01 17:55"),
            record("1", "A", "1", "UK", "2011-03-31 10:00"),
        ];
        let dims = Dimensions::build(&records);
        assert_eq!(dims.dates.len(), 2);

        let rows: Vec<_> = dims.date_rows().collect();
        assert_eq!(rows[0].0, 1);
        assert_eq!(rows[0].1.month_name, "Dec");
        assert_eq!(rows[0].1.quarter, 4);
        assert_eq!(rows[1].1.year, 2011);
        assert_eq!(rows[1].1.quarter, 1);
    }

    #[test]
    fn test_counts_and_guest_customer() {
        let records = vec![
            record("1", "A", "17850", "United Kingdom", "2010-12-01 08:26"),
            record("2", "B", "", "France", "2010-12-01 08:26"),
            record("3", "C", "", "United Kingdom", "2010-12-01 08:26"),
            record("4", "D", "17850.0", "France", "2010-12-01 08:26"),
        ];
        let dims = Dimensions::build(&records);
        assert_eq!(
            dims.counts(),
            DimensionCounts {
                customers: 2,
                products: 4,
                countries: 2,
                dates: 1,
            }
        );
        assert_eq!(dims.customers.get(&"GUEST".to_string()), Some(2));
    }

    #[test]
    fn test_build_is_deterministic() {
        let records = vec![
            record("1", "A", "3", "X", "2010-12-03 08:26"),
            record("2", "B", "1", "Y", "2010-12-01 08:26"),
            record("3", "C", "2", "Z", "2010-12-02 08:26"),
        ];
        let a = Dimensions::build(&records);
        let b = Dimensions::build(&records);
        assert!(a.customers.iter().eq(b.customers.iter()));
        assert!(a.products.iter().eq(b.products.iter()));
        assert!(a.dates.iter().eq(b.dates.iter()));
    }
}
