//! Spot prices per gram, keyed by canonical material name.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coin::Material;

/// Grams per troy ounce; spot feeds quote precious metals per ounce.
pub const TROY_OUNCE_GRAMS: f64 = 31.1034768;

/// Price used for materials the table does not know. Keeps the value
/// calculation total: unknown metals degrade to a near-zero value.
pub const UNKNOWN_MATERIAL_PRICE_PER_GRAM: f64 = 0.001;

/// Static EUR/g prices used when no live feed is reachable.
const FALLBACK_EUR_PER_GRAM: &[(Material, f64)] = &[
    (Material::Gold, 73.0),
    (Material::Silver, 0.90),
    (Material::Platinum, 29.0),
    (Material::Palladium, 30.0),
    (Material::Copper, 0.0085),
    (Material::Nickel, 0.016),
    (Material::Cupronickel, 0.011),
    (Material::Brass, 0.0055),
    (Material::Bronze, 0.007),
    (Material::Zinc, 0.0026),
    (Material::Steel, 0.0006),
    (Material::Iron, 0.0004),
    (Material::Aluminium, 0.0022),
    (Material::Base, 0.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Live,
    Fallback,
    Manual,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Fallback => "fallback",
            Self::Manual => "manual",
        }
    }
}

/// Material → price per gram.
///
/// Names go through [`Material::parse`], so `"Silber"` and `"silver"` share
/// an entry. Names outside the vocabulary are stored lower-cased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotPriceTable {
    prices: BTreeMap<String, f64>,
    source: PriceSource,
    fetched_at: Option<DateTime<Utc>>,
}

fn price_key(name: &str) -> String {
    match Material::parse(name) {
        Material::Unknown => name.trim().to_lowercase(),
        m => m.as_str().to_string(),
    }
}

impl SpotPriceTable {
    pub fn new(source: PriceSource) -> Self {
        Self {
            prices: BTreeMap::new(),
            source,
            fetched_at: None,
        }
    }

    /// Static table for offline operation.
    pub fn fallback() -> Self {
        let mut table = Self::new(PriceSource::Fallback);
        for &(material, price) in FALLBACK_EUR_PER_GRAM {
            table.insert(material.as_str(), price);
        }
        table
    }

    pub fn with_fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.fetched_at = Some(at);
        self
    }

    /// Insert or replace a price. Negative and non-finite prices are ignored.
    pub fn insert(&mut self, material: &str, price_per_gram: f64) {
        if price_per_gram.is_finite() && price_per_gram >= 0.0 {
            self.prices.insert(price_key(material), price_per_gram);
        }
    }

    pub fn get(&self, material: &str) -> Option<f64> {
        self.prices.get(&price_key(material)).copied()
    }

    /// Price per gram, or [`UNKNOWN_MATERIAL_PRICE_PER_GRAM`] when absent.
    pub fn price_per_gram(&self, material: &str) -> f64 {
        self.get(material).unwrap_or(UNKNOWN_MATERIAL_PRICE_PER_GRAM)
    }

    /// Copy entries this table lacks from `other`.
    pub fn fill_missing_from(&mut self, other: &SpotPriceTable) {
        for (k, v) in &other.prices {
            self.prices.entry(k.clone()).or_insert(*v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.prices.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }
}

impl Default for SpotPriceTable {
    fn default() -> Self {
        Self::fallback()
    }
}

impl<S: AsRef<str>> FromIterator<(S, f64)> for SpotPriceTable {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut table = Self::new(PriceSource::Manual);
        for (name, price) in iter {
            table.insert(name.as_ref(), price);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_covers_common_metals() {
        let table = SpotPriceTable::fallback();
        for metal in ["gold", "silver", "copper", "nickel", "brass", "zinc", "steel", "iron"] {
            assert!(table.get(metal).is_some(), "fallback missing {metal}");
        }
        assert_eq!(table.source(), PriceSource::Fallback);
    }

    #[test]
    fn synonyms_share_an_entry() {
        let table: SpotPriceTable = [("Silber", 1.60)].into_iter().collect();
        assert_eq!(table.get("silver"), Some(1.60));
        assert_eq!(table.get("SILBER"), Some(1.60));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_names_kept_lowercase() {
        let table: SpotPriceTable = [("Orichalcum", 2.0)].into_iter().collect();
        assert_eq!(table.get("orichalcum"), Some(2.0));
    }

    #[test]
    fn missing_material_uses_default_price() {
        let table = SpotPriceTable::new(PriceSource::Manual);
        assert_eq!(table.price_per_gram("gold"), UNKNOWN_MATERIAL_PRICE_PER_GRAM);
    }

    #[test]
    fn invalid_prices_ignored() {
        let mut table = SpotPriceTable::new(PriceSource::Manual);
        table.insert("gold", -1.0);
        table.insert("silver", f64::NAN);
        assert!(table.is_empty());
    }

    #[test]
    fn fill_missing_keeps_existing() {
        let mut live: SpotPriceTable = [("gold", 80.0)].into_iter().collect();
        live.fill_missing_from(&SpotPriceTable::fallback());
        assert_eq!(live.get("gold"), Some(80.0));
        assert_eq!(live.get("silver"), Some(0.90));
    }
}
