use serde::{Deserialize, Serialize};
use siphasher::sip128::{Hasher128, SipHasher13};
use std::collections::BTreeMap;
use std::hash::Hasher;

use super::normalize::{self, BrandTable};
use crate::error::FeatureError;
use crate::model::ProductRecord;

/// Characteristic keys appended to the signature, in this order.
pub const KEY_CHARACTERISTICS: &[&str] =
    &["цвет", "color", "размер", "size", "модель", "model", "тип", "type"];

/// Values meaning "none" or "unknown"; never part of a fingerprint.
const PLACEHOLDERS: &[&str] = &[
    "НЕТ", "NONE", "-", "—", "N/A", "НЕИЗВЕСТНО", "UNKNOWN", "NULL",
];

/// Longest characteristic value used when no significant keys are known.
const SHORT_VALUE_CHARS: usize = 50;

/// Normalized view of one product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    /// Cleaned name.
    pub name: String,
    /// Upper-cased model, backfilled from the name when missing.
    pub model: String,
    /// Canonical brand spelling.
    pub brand: String,
    /// Cleaned category name.
    pub category: String,
    pub characteristics: BTreeMap<String, String>,
}

impl Features {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.model.is_empty()
            && self.brand.is_empty()
            && self.category.is_empty()
            && self.characteristics.is_empty()
    }
}

/// Extract normalized features from a record.
pub fn extract_features(
    record: &ProductRecord,
    brands: &BrandTable,
    max_characteristics_len: usize,
) -> Result<Features, FeatureError> {
    let raw_chars = record.characteristics_raw.as_deref().unwrap_or("");
    if raw_chars.len() > max_characteristics_len {
        return Err(FeatureError::CharacteristicsTooLong {
            len: raw_chars.len(),
            limit: max_characteristics_len,
        });
    }

    let name = record.name.as_deref().unwrap_or("");
    let model = match record.model.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => Some(m.to_string()),
        _ => normalize::extract_model_from_name(name),
    };

    Ok(Features {
        name: normalize::clean_text(name),
        model: model
            .map(|m| normalize::collapse_whitespace(&m).to_uppercase())
            .unwrap_or_default(),
        brand: brands.normalize(record.manufacturer.as_deref().unwrap_or("")),
        category: normalize::clean_text(record.category_name.as_deref().unwrap_or("")),
        characteristics: normalize::parse_characteristics(raw_chars),
    })
}

/// Canonical text signature: priority fields, then key characteristics.
pub fn build_signature(features: &Features) -> String {
    let mut parts: Vec<String> = Vec::new();
    for field in [
        &features.model,
        &features.name,
        &features.brand,
        &features.category,
    ] {
        let cleaned = normalize::clean_text(field);
        if !cleaned.is_empty() {
            parts.push(cleaned);
        }
    }
    for key in KEY_CHARACTERISTICS {
        if let Some(value) = features.characteristics.get(*key) {
            let cleaned = normalize::clean_text(value);
            if !cleaned.is_empty() {
                parts.push(cleaned);
            }
        }
    }
    parts.join(" ")
}

/// Hash brand + model + significant characteristic values.
///
/// `None` for `significant_keys` selects every short-valued characteristic of
/// the product. Returns `None` unless the model or at least one selected
/// characteristic contributed: a brand alone is shared by unrelated products.
pub fn compute_fingerprint(features: &Features, significant_keys: Option<&[String]>) -> Option<String> {
    let mut parts: Vec<String> = vec![features.brand.clone(), features.model.clone()];
    let base = parts.len();

    let selected: Vec<(&str, &str)> = match significant_keys {
        Some(keys) => keys
            .iter()
            .filter_map(|k| {
                features
                    .characteristics
                    .get(k)
                    .map(|v| (k.as_str(), v.as_str()))
            })
            .collect(),
        None => features
            .characteristics
            .iter()
            .filter(|(_, v)| v.chars().count() < SHORT_VALUE_CHARS)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
    };

    for (key, value) in selected {
        let value = normalize::collapse_whitespace(value).to_uppercase();
        if !value.is_empty() && !is_placeholder(&value) {
            parts.push(format!("{key}:{value}"));
        }
    }

    if features.model.is_empty() && parts.len() == base {
        return None;
    }
    Some(fingerprint_hex(&parts.join("|")))
}

fn is_placeholder(value: &str) -> bool {
    PLACEHOLDERS.contains(&value)
}

fn fingerprint_hex(canonical: &str) -> String {
    let mut hasher = SipHasher13::new();
    hasher.write(canonical.as_bytes());
    format!("{:032x}", hasher.finish128().as_u128())
}
