//! Representation cache keys, content hashing, and argument hashing.
//!
//! This module is always compiled (no feature gate). Only the SQLite backend
//! (`storage.rs`) requires the `cache` feature with rusqlite.

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use super::clustering::SparseVector;
use crate::error::Result;

/// Identifies one batch of representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Hash of the ordered signatures (detects data changes).
    pub content_hash: u64,
    /// Hash of the vectorizer settings (detects config changes).
    pub args_hash: u64,
}

impl CacheKey {
    pub fn new(signatures: &[String], args: &impl Serialize) -> Self {
        Self {
            content_hash: content_hash(signatures),
            args_hash: args_hash(args),
        }
    }
}

/// Metadata stored alongside cached representations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub key: CacheKey,
    /// Number of products when the batch was cached.
    pub row_count: usize,
    /// Crate version when the entry was created (detects upgrades).
    pub version: String,
    /// Unix timestamp when the entry was created.
    pub created_at: u64,
}

impl CacheMeta {
    pub fn new(key: CacheKey, row_count: usize) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            key,
            row_count,
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at,
        }
    }
}

/// SipHash of the ordered signature list. Order and boundaries matter:
/// `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn content_hash(signatures: &[String]) -> u64 {
    if signatures.is_empty() {
        return 0;
    }
    let mut hasher = SipHasher13::new();
    signatures.hash(&mut hasher);
    hasher.finish()
}

/// Serialize the settings to JSON and SipHash the bytes.
pub fn args_hash(args: &impl Serialize) -> u64 {
    let json = serde_json::to_string(args).unwrap_or_default();
    let mut hasher = SipHasher13::new();
    json.hash(&mut hasher);
    hasher.finish()
}

/// A cached entry is usable only when its key and crate version match.
pub fn is_valid(meta: &CacheMeta, key: &CacheKey) -> bool {
    meta.key == *key && meta.version == env!("CARGO_PKG_VERSION")
}

/// Where per-product representations are kept between runs, so a strictness
/// change re-clusters without re-vectorizing.
pub trait RepresentationStore {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<SparseVector>>>;

    fn save(&mut self, meta: &CacheMeta, vectors: &[SparseVector]) -> Result<()>;
}

/// Bounded in-process store; evicts the oldest batch first.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    capacity: usize,
    entries: HashMap<CacheKey, Vec<SparseVector>>,
    order: VecDeque<CacheKey>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(8)
    }
}

impl RepresentationStore for MemoryStore {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<SparseVector>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, meta: &CacheMeta, vectors: &[SparseVector]) -> Result<()> {
        if self.entries.insert(meta.key, vectors.to_vec()).is_none() {
            self.order.push_back(meta.key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        Ok(())
    }
}
