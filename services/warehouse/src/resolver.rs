//! Fact resolver - swaps natural keys for surrogate keys
//!
//! Every natural key on a cleaned record was registered by
//! [`Dimensions::build`], so a lookup miss is a bug, not bad data. Misses are
//! counted per dimension and the key is left empty; the run carries on.

use crate::cleaner::CleanedRecord;
use crate::dimensions::{Dimensions, ProductKey, SurrogateKey};
use crate::error::{Dimension, UnresolvedDimensionKey};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;

/// One row of `fact_sales`
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub line_id: i64,
    pub invoice_no: String,
    pub invoice_datetime: NaiveDateTime,
    pub date_key: Option<SurrogateKey>,
    pub customer_key: Option<SurrogateKey>,
    pub product_key: Option<SurrogateKey>,
    pub country_key: Option<SurrogateKey>,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub revenue: Decimal,
    pub is_return: bool,
}

/// Lookup misses per dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnresolvedCounts {
    pub date: usize,
    pub customer: usize,
    pub product: usize,
    pub country: usize,
}

impl UnresolvedCounts {
    pub fn total(&self) -> usize {
        self.date + self.customer + self.product + self.country
    }

    pub fn get(&self, dimension: Dimension) -> usize {
        match dimension {
            Dimension::Date => self.date,
            Dimension::Customer => self.customer,
            Dimension::Product => self.product,
            Dimension::Country => self.country,
        }
    }

    /// One entry per dimension with at least one miss
    pub fn failures(&self) -> Vec<UnresolvedDimensionKey> {
        Dimension::ALL
            .into_iter()
            .filter(|d| self.get(*d) > 0)
            .map(|dimension| UnresolvedDimensionKey {
                dimension,
                count: self.get(dimension),
            })
            .collect()
    }
}

/// Output of the resolver stage
#[derive(Debug, Default)]
pub struct Resolution {
    pub facts: Vec<FactRow>,
    pub unresolved: UnresolvedCounts,
}

fn lookup(key: Option<SurrogateKey>, misses: &mut usize) -> Option<SurrogateKey> {
    if key.is_none() {
        *misses += 1;
    }
    key
}

/// Resolve every cleaned record to a fact row. Line ids follow record order, from 1.
pub fn resolve_facts(records: Vec<CleanedRecord>, dims: &Dimensions) -> Resolution {
    let mut unresolved = UnresolvedCounts::default();
    let mut facts = Vec::with_capacity(records.len());

    for (idx, record) in records.into_iter().enumerate() {
        let date_key = lookup(dims.dates.get(&record.date.full_date), &mut unresolved.date);
        let customer_key = lookup(dims.customers.get(&record.customer_id), &mut unresolved.customer);
        let product_key = lookup(dims.products.get(&ProductKey::of(&record)), &mut unresolved.product);
        let country_key = lookup(dims.countries.get(&record.country), &mut unresolved.country);

        facts.push(FactRow {
            line_id: idx as i64 + 1,
            invoice_no: record.invoice_no,
            invoice_datetime: record.invoice_datetime,
            date_key,
            customer_key,
            product_key,
            country_key,
            quantity: record.quantity,
            unit_price: record.unit_price,
            revenue: record.revenue,
            is_return: record.is_return,
        });
    }

    for failure in unresolved.failures() {
        tracing::warn!(
            dimension = %failure.dimension,
            count = failure.count,
            "{}",
            failure
        );
    }
    tracing::info!(facts = facts.len(), "resolved fact rows");

    Resolution { facts, unresolved }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::clean_records;
    use crate::input::RawRecord;

    fn raw(invoice: &str, stock: &str, desc: &str, qty: &str, customer: &str, country: &str) -> RawRecord {
        RawRecord {
            location: format!("test:{}", invoice),
            invoice: invoice.to_string(),
            stock_code: stock.to_string(),
            description: desc.to_string(),
            quantity: qty.to_string(),
            invoice_date: "2010-12-01 08:26".to_string(),
            price: "2.50".to_string(),
            customer_id: customer.to_string(),
            country: country.to_string(),
        }
    }

    fn sample() -> Vec<CleanedRecord> {
        clean_records(vec![
            raw("536365", "71053", "WHITE METAL LANTERN", "6", "17850", "United Kingdom"),
            raw("536366", "22633", "HAND WARMER UNION JACK", "6", "", "United Kingdom"),
            raw("C536379", "D", "Discount", "-1", "14527", "France"),
            raw("536367", "71053", "WHITE METAL LANTERN", "2", "17850", "France"),
        ])
        .records
    }

    // -------------------------------------------------------------------------
    // RESOLUTION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_all_keys_resolve() {
        let records = sample();
        let dims = Dimensions::build(&records);
        let resolution = resolve_facts(records, &dims);

        assert_eq!(resolution.facts.len(), 4);
        assert_eq!(resolution.unresolved, UnresolvedCounts::default());
        for fact in &resolution.facts {
            assert!(fact.date_key.is_some());
            assert!(fact.customer_key.is_some());
            assert!(fact.product_key.is_some());
            assert!(fact.country_key.is_some());
        }
    }

    #[test]
    fn test_keys_point_at_matching_entries() {
        let records = sample();
        let dims = Dimensions::build(&records);
        let facts = resolve_facts(records, &dims).facts;

        // same product on two invoices
        assert_eq!(facts[0].product_key, facts[3].product_key);
        assert_eq!(facts[0].customer_key, facts[3].customer_key);
        assert_ne!(facts[0].country_key, facts[3].country_key);
        assert_eq!(facts[1].customer_key, dims.customers.get(&"GUEST".to_string()));
    }

    #[test]
    fn test_line_ids_and_measures() {
        let records = sample();
        let dims = Dimensions::build(&records);
        let facts = resolve_facts(records, &dims).facts;

        let ids: Vec<i64> = facts.iter().map(|f| f.line_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(facts[2].invoice_no, "C536379");
        assert!(facts[2].is_return);
        assert_eq!(facts[2].revenue, Decimal::new(-250, 2));
        assert_eq!(facts[0].revenue, Decimal::new(1500, 2));
    }

    // -------------------------------------------------------------------------
    // UNRESOLVED KEY TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_dimension_entries_are_counted() {
        let records = sample();
        // Built from a subset, so the resolver sees keys the builder never did
        let dims = Dimensions::build(&records[..1]);
        let resolution = resolve_facts(records, &dims);

        assert_eq!(resolution.facts.len(), 4);
        assert_eq!(resolution.unresolved.date, 0);
        assert_eq!(resolution.unresolved.customer, 2);
        assert_eq!(resolution.unresolved.product, 2);
        assert_eq!(resolution.unresolved.country, 2);
        assert_eq!(resolution.unresolved.total(), 6);
        assert_eq!(resolution.facts[1].customer_key, None);

        let failures = resolution.unresolved.failures();
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0].dimension, Dimension::Customer);
        assert_eq!(failures[0].to_string(), "2 fact rows have no dim_customer key");
    }

    #[test]
    fn test_empty_input() {
        let dims = Dimensions::build(&[]);
        let resolution = resolve_facts(Vec::new(), &dims);
        assert!(resolution.facts.is_empty());
        assert_eq!(resolution.unresolved.total(), 0);
    }
}
