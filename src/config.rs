use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::algo::clustering::{Linkage, Vectorizer};
use crate::algo::normalize::BrandTable;
use crate::algo::schema::Schema;
use crate::algo::significant::{self, SignificantFeatureTable};
use crate::algo::tfidf::{ShingleVectorizer, TfidfVectorizer};
use crate::error::{GroupingError, Result};

/// Embedded default configuration, compiled from `config/default.json`.
/// Users override with `$SKU_GROUPER_CONFIG`,
/// `$XDG_DATA_HOME/sku-grouper/config.json`, or `--config <path>`.
const EMBEDDED_DEFAULT: &str = include_str!("../config/default.json");

const APP_DIR: &str = "sku-grouper";

/// Tunables of the grouping engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default strictness when a caller does not pass one.
    pub strictness: f64,
    /// Pass 2 runs only when the remainder is strictly larger than this.
    pub min_similarity_sample: usize,
    /// Remainders larger than this skip clustering and use the fallback.
    pub max_similarity_items: usize,
    /// Lower ceiling for average and complete linkage. Those build a dense
    /// n×n distance matrix and merge in O(n³) time, so 5000 items would be
    /// ~10^11 steps and ~200 MB; single linkage is not bounded by this.
    pub max_hac_items: usize,
    /// Longest accepted raw characteristics string, in bytes.
    pub max_characteristics_len: usize,
    pub vectorizer: VectorizerConfig,
    pub linkage: Linkage,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strictness: 0.7,
            min_similarity_sample: 10,
            max_similarity_items: 5000,
            max_hac_items: 1000,
            max_characteristics_len: 65_536,
            vectorizer: VectorizerConfig::default(),
            linkage: Linkage::Single,
        }
    }
}

impl EngineConfig {
    /// Largest remainder pass 2 clusters with the configured linkage.
    pub fn similarity_ceiling(&self) -> usize {
        match self.linkage {
            Linkage::Single => self.max_similarity_items,
            Linkage::Average | Linkage::Complete => {
                self.max_similarity_items.min(self.max_hac_items)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        crate::engine::check_strictness(self.strictness)?;
        match &self.vectorizer {
            VectorizerConfig::Tfidf(v) if v.ngram_max == 0 || v.max_features == 0 => Err(
                GroupingError::Config("tfidf ngram_max and max_features must be positive".into()),
            ),
            VectorizerConfig::Shingles(v) if v.n == 0 => {
                Err(GroupingError::Config("shingle size must be positive".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Which representation pass 2 builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VectorizerConfig {
    Tfidf(TfidfVectorizer),
    Shingles(ShingleVectorizer),
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self::Tfidf(TfidfVectorizer::default())
    }
}

impl VectorizerConfig {
    pub fn vectorizer(&self) -> &dyn Vectorizer {
        match self {
            Self::Tfidf(v) => v as &dyn Vectorizer,
            Self::Shingles(v) => v,
        }
    }
}

/// Everything an aggregation needs besides the products themselves.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub table: SignificantFeatureTable,
    pub brands: BrandTable,
    pub schema: Schema,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Context built from user files when present, else embedded defaults.
    pub fn resolve(config_path: Option<&str>) -> Result<Self> {
        let config = match config_path {
            Some(path) => load_config(path)?,
            None => default_config(),
        };
        config.validate()?;
        Ok(Self {
            config,
            table: significant::default_table(),
            ..Self::default()
        })
    }

    pub fn with_table(mut self, table: SignificantFeatureTable) -> Self {
        self.table = table;
        self
    }

    pub fn with_brands(mut self, brands: BrandTable) -> Self {
        self.brands = brands;
        self
    }
}

/// Load the configuration using this resolution order:
///
/// 1. `$SKU_GROUPER_CONFIG` env var (path to JSON file)
/// 2. `$XDG_DATA_HOME/sku-grouper/config.json` (or `~/.local/share/...`)
/// 3. Embedded compile-time default from `config/default.json`
///
/// Any resolution step that fails silently falls through to the next.
pub fn default_config() -> EngineConfig {
    if let Some(config) = user_file("SKU_GROUPER_CONFIG", "config.json")
        .and_then(|json| parse_config(&json).ok())
        .filter(|c| c.validate().is_ok())
    {
        return config;
    }
    parse_config(EMBEDDED_DEFAULT).unwrap_or_default()
}

pub fn parse_config(json: &str) -> Result<EngineConfig> {
    serde_json::from_str(json).map_err(|e| GroupingError::Config(format!("Failed to parse config: {e}")))
}

/// Load a configuration file; unlike the default chain, failures are errors.
pub fn load_config(path: &str) -> Result<EngineConfig> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| GroupingError::Config(format!("Failed to read '{path}': {e}")))?;
    let config = parse_config(&json)?;
    config.validate()?;
    Ok(config)
}

/// Return the embedded default configuration as a JSON string.
pub fn embedded_default_json() -> &'static str {
    EMBEDDED_DEFAULT
}

/// Contents of the first readable user override: the file named by
/// `env_var`, then `file_name` under the XDG data directory.
pub(crate) fn user_file(env_var: &str, file_name: &str) -> Option<String> {
    if let Ok(path) = std::env::var(env_var) {
        if let Ok(json) = std::fs::read_to_string(&path) {
            return Some(json);
        }
    }
    let path = xdg_path(file_name)?;
    if path.exists() {
        return std::fs::read_to_string(&path).ok();
    }
    None
}

fn xdg_path(file_name: &str) -> Option<PathBuf> {
    let data_home = std::env::var("XDG_DATA_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".local/share"))
        })?;
    Some(data_home.join(APP_DIR).join(file_name))
}
