use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static KEY_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));
static DELIMITER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[;|,·•]").expect("valid regex"));

/// Size and model notations, most specific first.
static MODEL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // 215/55R16, 315/80 R22.5
        r"\d{2,4}\s?/\s?\d{2,3}\s?[RrРр]?\s?\d{1,2}(?:[.,]\d)?",
        // 11.00 R22.5
        r"\d{1,2}[.,]\d{2}\s?[RrРр]\s?\d{2}(?:[.,]\d)?",
        // 18x9.50-8, 300х200
        r"\d+(?:[.,]\d+)?\s?[xXхХ×]\s?\d+(?:[.,]\d+)?(?:\s?-\s?\d+(?:[.,]\d+)?)?",
        // HB-500, X120
        r"\b[A-Za-z]{1,5}-?\d{2,}[A-Za-z0-9-]*\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

const DEFAULT_BRANDS: &[(&str, &str)] = &[
    ("husqvarna", "HUSQVARNA AB"),
    ("huskvarna", "HUSQVARNA AB"),
    ("husqwarna", "HUSQVARNA AB"),
    ("ozka", "Ozka"),
    ("superguider", "Superguider"),
    ("ekka", "EKKA"),
    ("michelin", "Michelin"),
    ("hankook", "Hankook"),
];

/// Lower-case, replace punctuation with spaces, collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = NON_WORD_RE.replace_all(&lower, " ");
    collapse_whitespace(&stripped)
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Canonical brand table: substring needle -> canonical spelling.
///
/// Scanned in order; the first needle contained in the case-folded input wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandTable {
    entries: Vec<(String, String)>,
}

impl BrandTable {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(needle, canonical)| (needle.trim().to_lowercase(), canonical))
            .filter(|(needle, _)| !needle.is_empty())
            .collect();
        Self { entries }
    }

    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let folded = trimmed.to_lowercase();
        for (needle, canonical) in &self.entries {
            if folded.contains(needle.as_str()) {
                return canonical.clone();
            }
        }
        title_case(trimmed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BrandTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_BRANDS
                .iter()
                .map(|(n, c)| (n.to_string(), c.to_string()))
                .collect(),
        )
    }
}

/// Normalize a brand against the default brand table.
pub fn normalize_brand(raw: &str) -> String {
    static DEFAULT: Lazy<BrandTable> = Lazy::new(BrandTable::default);
    DEFAULT.normalize(raw)
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Normalize a characteristic key: lower-case, punctuation and whitespace
/// runs become `_`.
pub fn normalize_key(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    KEY_PUNCT_RE
        .replace_all(&lower, "_")
        .trim_matches('_')
        .to_string()
}

/// Parse a freeform characteristics string into key/value pairs.
///
/// Accepts a JSON object, or tokens separated by `;`, `|`, `,`, `·`, `•`,
/// each split on `:`, else `=`, else the first non-leading `-`. Tokens
/// without a separator are dropped, so are empty keys.
pub fn parse_characteristics(raw: &str) -> BTreeMap<String, String> {
    let text = raw.trim();
    if text.is_empty() {
        return BTreeMap::new();
    }
    if text.starts_with('{') && text.ends_with('}') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
            return map
                .into_iter()
                .filter_map(|(k, v)| {
                    let key = normalize_key(&k);
                    let value = match v {
                        Value::String(s) => s,
                        Value::Null => return None,
                        other => other.to_string(),
                    };
                    (!key.is_empty()).then(|| (key, collapse_whitespace(&value)))
                })
                .collect();
        }
    }

    let mut result = BTreeMap::new();
    for part in DELIMITER_RE.split(text) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((key, value)) = split_pair(part) else {
            continue;
        };
        let key = normalize_key(key);
        if key.is_empty() {
            continue;
        }
        result.insert(key, collapse_whitespace(value));
    }
    result
}

fn split_pair(part: &str) -> Option<(&str, &str)> {
    if let Some(pair) = part.split_once(':') {
        return Some(pair);
    }
    if let Some(pair) = part.split_once('=') {
        return Some(pair);
    }
    match part.find('-') {
        Some(pos) if pos > 0 => Some((&part[..pos], &part[pos + 1..])),
        _ => None,
    }
}

/// Pull a size/model notation out of a product name. First pattern wins.
pub fn extract_model_from_name(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return None;
    }
    MODEL_PATTERNS.iter().find_map(|re| {
        re.find(name).map(|m| {
            m.as_str()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase()
        })
    })
}
