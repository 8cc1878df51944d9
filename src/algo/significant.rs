use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::features::Features;
use super::normalize;
use crate::config;
use crate::error::{GroupingError, Result};

/// Embedded seed table, compiled from `config/significant_features.json`.
/// Users override with `$SKU_GROUPER_FEATURES` or
/// `$XDG_DATA_HOME/sku-grouper/significant_features.json`.
const EMBEDDED_DEFAULT: &str = include_str!("../../config/significant_features.json");

const MIN_PRESENCE: f64 = 0.3;
const MIN_UNIQUENESS: f64 = 0.05;
const MAX_UNIQUENESS: f64 = 0.7;
const TOP_KEYS: usize = 10;

/// Category keyword and its ordered diagnostic keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub keyword: String,
    pub keys: Vec<String>,
}

/// Category keyword -> diagnostic characteristic keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificantFeatureTable {
    pub entries: Vec<SeedEntry>,
}

impl SignificantFeatureTable {
    /// Keys of the first entry whose keyword occurs in the category name.
    pub fn lookup(&self, category: &str) -> Option<&[String]> {
        let category = normalize::clean_text(category);
        if category.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| {
                let keyword = normalize::clean_text(&e.keyword);
                !keyword.is_empty() && category.contains(&keyword)
            })
            .map(|e| e.keys.as_slice())
    }
}

impl Default for SignificantFeatureTable {
    fn default() -> Self {
        parse_table(EMBEDDED_DEFAULT).expect("embedded significant feature table is invalid JSON")
    }
}

/// Load the seed table: env var, then XDG data dir, then the embedded default.
pub fn default_table() -> SignificantFeatureTable {
    config::user_file("SKU_GROUPER_FEATURES", "significant_features.json")
        .and_then(|json| parse_table(&json).ok())
        .unwrap_or_default()
}

pub fn parse_table(json: &str) -> Result<SignificantFeatureTable> {
    serde_json::from_str(json)
        .map_err(|e| GroupingError::Config(format!("Failed to parse significant feature table: {e}")))
}

pub fn load_table(path: &str) -> Result<SignificantFeatureTable> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| GroupingError::Config(format!("Failed to read '{path}': {e}")))?;
    parse_table(&json)
}

/// Statistics for one characteristic key across a product set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyStats {
    pub key: String,
    pub presence_ratio: f64,
    pub uniqueness_ratio: f64,
    pub score: f64,
    /// Whether the key passes the presence and uniqueness filters.
    pub diagnostic: bool,
}

/// Presence/uniqueness statistics for every observed key, sorted by key.
pub fn key_stats(products: &[&BTreeMap<String, String>]) -> Vec<KeyStats> {
    let n = products.len();
    if n == 0 {
        return Vec::new();
    }
    let all_keys: BTreeSet<&String> = products.iter().flat_map(|p| p.keys()).collect();

    all_keys
        .into_iter()
        .map(|key| {
            let values: Vec<String> = products
                .iter()
                .filter_map(|p| p.get(key))
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect();
            let presence_ratio = values.len() as f64 / n as f64;
            let uniqueness_ratio = if values.is_empty() {
                1.0
            } else {
                let distinct: HashSet<&String> = values.iter().collect();
                distinct.len() as f64 / values.len() as f64
            };
            let diagnostic = presence_ratio >= MIN_PRESENCE
                && uniqueness_ratio > MIN_UNIQUENESS
                && uniqueness_ratio < MAX_UNIQUENESS;
            KeyStats {
                key: key.clone(),
                presence_ratio,
                uniqueness_ratio,
                score: presence_ratio * (1.0 - uniqueness_ratio),
                diagnostic,
            }
        })
        .collect()
}

/// Rank diagnostic keys: common enough to compare, neither identifier-like
/// nor constant. Top 10 by score, ties by key name.
pub fn auto_detect(products: &[&BTreeMap<String, String>]) -> Vec<String> {
    let mut stats: Vec<KeyStats> = key_stats(products)
        .into_iter()
        .filter(|s| s.diagnostic)
        .collect();
    stats.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
    stats.truncate(TOP_KEYS);
    stats.into_iter().map(|s| s.key).collect()
}

/// Significant keys resolved per category bucket for one batch.
#[derive(Debug, Clone, Default)]
pub struct KeyResolution {
    buckets: BTreeMap<String, Vec<String>>,
}

impl KeyResolution {
    /// Seed keys when the category matches the table, else keys
    /// auto-detected over the products of that category.
    pub fn resolve(table: &SignificantFeatureTable, features: &[Features]) -> Self {
        let mut by_category: BTreeMap<&str, Vec<&BTreeMap<String, String>>> = BTreeMap::new();
        for f in features {
            by_category
                .entry(f.category.as_str())
                .or_default()
                .push(&f.characteristics);
        }

        let buckets = by_category
            .into_iter()
            .map(|(category, chars)| {
                let keys = match table.lookup(category) {
                    Some(seed) => seed.to_vec(),
                    None => auto_detect(&chars),
                };
                (category.to_string(), keys)
            })
            .collect();
        Self { buckets }
    }

    /// Keys for a category, `None` when nothing was resolved.
    pub fn keys_for(&self, category: &str) -> Option<&[String]> {
        self.buckets
            .get(category)
            .filter(|keys| !keys.is_empty())
            .map(|keys| keys.as_slice())
    }
}
