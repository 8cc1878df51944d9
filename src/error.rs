use serde::Serialize;
use thiserror::Error;

use crate::model::ProductId;

pub type Result<T> = std::result::Result<T, GroupingError>;

/// Errors surfaced to callers of the grouping engine and the catalog.
#[derive(Debug, Error)]
pub enum GroupingError {
    #[error("schema mismatch: expected columns {expected:?}, found {found:?}")]
    Schema {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("duplicate product id: {0}")]
    DuplicateProduct(ProductId),

    #[error("invalid catalog state: {0}")]
    State(String),

    #[error("moderator score must be between 1 and 5, got {0}")]
    InvalidScore(i64),

    #[error("strictness must be within [0, 1], got {0}")]
    InvalidStrictness(f64),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache error: {0}")]
    Cache(String),
}

/// Numerical failure while building representations or clustering them.
///
/// Never fatal: the similarity pass catches it and falls back to the
/// token-prefix heuristic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    #[error("empty vocabulary after pruning")]
    EmptyVocabulary,

    #[error("too few samples to cluster: {0}")]
    TooFewSamples(usize),

    #[error("non-finite weight in representation {0}")]
    NonFinite(usize),
}

/// Per-product feature extraction failure, isolated to that product.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("characteristics string is {len} bytes, limit is {limit}")]
    CharacteristicsTooLong { len: usize, limit: usize },
}

/// Non-fatal conditions reported alongside an aggregation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Rows excluded because of a localized column shift.
    RowCorruption { count: usize, sample: Vec<usize> },
    /// Similarity clustering failed numerically; fallback grouping was used.
    VectorizationFallback { reason: String },
    /// Remainder exceeded the size ceiling; fallback grouping was used.
    SizeCeiling { size: usize, ceiling: usize },
    /// A product's features could not be extracted; treated as empty.
    FeatureExtraction { product_id: ProductId, reason: String },
}

impl Diagnostic {
    pub fn message(&self) -> String {
        match self {
            Self::RowCorruption { count, sample } => {
                format!("column shift detected in {count} rows (sample: {sample:?}); rows skipped")
            }
            Self::VectorizationFallback { reason } => {
                format!("similarity clustering failed ({reason}); used token-prefix fallback")
            }
            Self::SizeCeiling { size, ceiling } => {
                format!("remainder of {size} products exceeds ceiling {ceiling}; used token-prefix fallback")
            }
            Self::FeatureExtraction { product_id, reason } => {
                format!("product {product_id}: {reason}; treated as empty")
            }
        }
    }
}
