use std::collections::{BTreeSet, HashMap, HashSet};

use strsim::{jaro, jaro_winkler, normalized_levenshtein};

/// Supported string similarity metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Levenshtein,
    JaroWinkler,
    Cosine,
    /// Word-order-insensitive blend used to place single products.
    Signature,
}

/// String similarity in [0, 1] (1 = identical) using the given metric.
pub fn similarity(a: &str, b: &str, metric: Metric) -> f64 {
    match metric {
        Metric::Levenshtein => normalized_levenshtein(a, b),
        Metric::JaroWinkler => jaro_winkler(a, b),
        Metric::Cosine => bigram_cosine(a, b),
        Metric::Signature => signature_similarity(a, b),
    }
}

/// 0.4 x Levenshtein over sorted tokens + 0.3 x Jaro + 0.3 x token-set overlap.
pub fn signature_similarity(a: &str, b: &str) -> f64 {
    if a.trim().is_empty() && b.trim().is_empty() {
        return 1.0;
    }
    let sorted = normalized_levenshtein(&token_sort(a), &token_sort(b));
    0.4 * sorted + 0.3 * jaro(a, b) + 0.3 * token_set_ratio(a, b)
}

/// Tokens lower-cased, sorted and space-joined.
fn token_sort(s: &str) -> String {
    let mut tokens: Vec<String> = s.split_whitespace().map(str::to_lowercase).collect();
    tokens.sort();
    tokens.join(" ")
}

/// Jaccard overlap of the lower-cased token sets.
fn token_set_ratio(a: &str, b: &str) -> f64 {
    let sa: BTreeSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let sb: BTreeSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 1.0;
    }
    sa.intersection(&sb).count() as f64 / union as f64
}

/// Cosine similarity on character bigrams.
fn bigram_cosine(a: &str, b: &str) -> f64 {
    let bigrams_a = char_bigrams(a);
    let bigrams_b = char_bigrams(b);

    if bigrams_a.is_empty() || bigrams_b.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }

    let all_keys: HashSet<&String> = bigrams_a.keys().chain(bigrams_b.keys()).collect();
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for key in all_keys {
        let va = *bigrams_a.get(key).unwrap_or(&0) as f64;
        let vb = *bigrams_b.get(key).unwrap_or(&0) as f64;
        dot += va * vb;
        norm_a += va * va;
        norm_b += vb * vb;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn char_bigrams(s: &str) -> HashMap<String, u32> {
    let chars: Vec<char> = s.to_lowercase().chars().collect();
    let mut map = HashMap::new();
    for pair in chars.windows(2) {
        *map.entry(pair.iter().collect()).or_insert(0) += 1;
    }
    map
}

impl Metric {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "levenshtein" | "lev" => Some(Self::Levenshtein),
            "jaro-winkler" | "jaro_winkler" | "jw" => Some(Self::JaroWinkler),
            "cosine" | "cos" => Some(Self::Cosine),
            "signature" | "sig" => Some(Self::Signature),
            _ => None,
        }
    }

    pub fn all_names() -> &'static [&'static str] {
        &["levenshtein", "jaro-winkler", "cosine", "signature"]
    }
}
