//! Pass 2: similarity clustering of the products pass 1 left over.
//!
//! Strictness maps to a cosine threshold (`0.3 + 0.6 * s`) and, for the
//! token-prefix fallback, to a prefix length (`1 + round(7 * s)`). Both
//! are increasing, so a stricter run only ever splits groups.

use std::collections::HashMap;

use super::assemble::Draft;
use crate::algo::cache::{CacheKey, CacheMeta, RepresentationStore};
use crate::algo::clustering::{self, SparseVector};
use crate::config::EngineConfig;
use crate::error::{ClusterError, Diagnostic};
use crate::model::Origin;

/// Cosine similarity two products need to be linked.
pub fn threshold_for(strictness: f64) -> f64 {
    0.3 + 0.6 * strictness
}

/// Signature tokens the fallback heuristic compares.
pub fn prefix_len_for(strictness: f64) -> usize {
    1 + (7.0 * strictness).round() as usize
}

/// Clusters over the remainder (indices into its signature slice).
#[derive(Debug, Clone, Default)]
pub struct SimilarityPass {
    pub clusters: Vec<Draft>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Cluster the remainder. Never fails: numerical trouble and oversized
/// input route to the fallback heuristic with a diagnostic.
pub fn group_remainder(
    signatures: &[String],
    strictness: f64,
    config: &EngineConfig,
    store: &mut dyn RepresentationStore,
) -> SimilarityPass {
    let n = signatures.len();
    if n == 0 {
        return SimilarityPass::default();
    }

    if n <= config.min_similarity_sample {
        tracing::debug!(remainder = n, "remainder below similarity sample size, singletons");
        return SimilarityPass {
            clusters: (0..n).map(|i| Draft::new(vec![i], Origin::Fallback)).collect(),
            diagnostics: Vec::new(),
        };
    }

    let ceiling = config.similarity_ceiling();
    if n > ceiling {
        let diagnostic = Diagnostic::SizeCeiling { size: n, ceiling };
        tracing::warn!("{}", diagnostic.message());
        return fallback_pass(signatures, strictness, diagnostic);
    }

    let labels = representations(signatures, config, store).and_then(|vectors| {
        clustering::cluster(&vectors, threshold_for(strictness), config.linkage)
    });
    match labels {
        Ok(labels) => {
            let clusters = from_labels(&labels)
                .into_iter()
                .map(|members| Draft::new(members, Origin::Similarity))
                .collect::<Vec<_>>();
            tracing::debug!(remainder = n, clusters = clusters.len(), "similarity pass done");
            SimilarityPass {
                clusters,
                diagnostics: Vec::new(),
            }
        }
        Err(err) => {
            let diagnostic = Diagnostic::VectorizationFallback {
                reason: err.to_string(),
            };
            tracing::warn!("{}", diagnostic.message());
            fallback_pass(signatures, strictness, diagnostic)
        }
    }
}

fn fallback_pass(signatures: &[String], strictness: f64, diagnostic: Diagnostic) -> SimilarityPass {
    SimilarityPass {
        clusters: fallback_groups(signatures, strictness)
            .into_iter()
            .map(|members| Draft::new(members, Origin::Fallback))
            .collect(),
        diagnostics: vec![diagnostic],
    }
}

/// Cached vectors for this exact remainder and vectorizer, else computed
/// and stored. Store failures only cost the cache.
fn representations(
    signatures: &[String],
    config: &EngineConfig,
    store: &mut dyn RepresentationStore,
) -> Result<Vec<SparseVector>, ClusterError> {
    let key = CacheKey::new(signatures, &config.vectorizer);
    match store.load(&key) {
        Ok(Some(vectors)) if vectors.len() == signatures.len() => {
            tracing::debug!(rows = vectors.len(), "representation cache hit");
            return Ok(vectors);
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("representation cache read failed: {e}"),
    }

    let vectors = config.vectorizer.vectorizer().compute_representation(signatures)?;
    if let Err(e) = store.save(&CacheMeta::new(key, signatures.len()), &vectors) {
        tracing::warn!("representation cache write failed: {e}");
    }
    Ok(vectors)
}

/// Group by the first K whitespace tokens of the signature. Empty
/// signatures stay alone. Groups ordered by first member.
pub fn fallback_groups(signatures: &[String], strictness: f64) -> Vec<Vec<usize>> {
    let k = prefix_len_for(strictness);
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (i, signature) in signatures.iter().enumerate() {
        let prefix = signature.split_whitespace().take(k).collect::<Vec<_>>().join(" ");
        if prefix.is_empty() {
            groups.push(vec![i]);
            continue;
        }
        match slots.get(&prefix) {
            Some(&slot) => groups[slot].push(i),
            None => {
                slots.insert(prefix, groups.len());
                groups.push(vec![i]);
            }
        }
    }
    groups
}

fn from_labels(labels: &[usize]) -> Vec<Vec<usize>> {
    let count = labels.iter().max().map_or(0, |m| m + 1);
    let mut clusters = vec![Vec::new(); count];
    for (i, &label) in labels.iter().enumerate() {
        clusters[label].push(i);
    }
    clusters
}
