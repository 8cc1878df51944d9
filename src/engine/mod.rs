//! The two-pass grouping pipeline.
//!
//! `aggregate` normalizes and fingerprints a batch, groups exact duplicates
//! (pass 1), clusters the remainder by similarity (pass 2) and assembles
//! both into groups with ids from the caller's [`IdAllocator`].

pub mod assemble;
pub mod exact;
pub mod similarity;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algo::cache::RepresentationStore;
use crate::algo::features::{self, Features};
use crate::algo::significant::KeyResolution;
use crate::config::EngineContext;
use crate::error::{Diagnostic, GroupingError, Result};
use crate::model::{Group, Origin, ProductRecord};

use assemble::Draft;

/// Reject NaN and values outside [0, 1].
pub fn check_strictness(strictness: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&strictness) {
        Ok(strictness)
    } else {
        Err(GroupingError::InvalidStrictness(strictness))
    }
}

/// Monotonic group id sequence shared by every origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn allocate(&mut self, origin: Origin) -> String {
        let id = format!("{}_{}", origin.prefix(), self.next);
        self.next += 1;
        id
    }

    /// Move past an id allocated elsewhere so it is never handed out again.
    pub fn observe(&mut self, id: &str) {
        if let Some(seq) = id.rsplit('_').next().and_then(|s| s.parse::<u64>().ok()) {
            if seq >= self.next {
                self.next = seq + 1;
            }
        }
    }
}

/// Groups produced by one aggregation plus non-fatal diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub groups: Vec<Group>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Per-product features, signatures and fingerprints of a batch.
#[derive(Debug, Clone, Default)]
pub struct Prepared {
    pub features: Vec<Features>,
    pub signatures: Vec<String>,
    pub fingerprints: Vec<Option<String>>,
    pub resolution: KeyResolution,
    pub diagnostics: Vec<Diagnostic>,
}

/// Normalize and fingerprint a batch, writing the normalized
/// characteristics and fingerprint back onto each record.
///
/// A product whose features cannot be extracted is treated as empty.
pub fn prepare(records: &mut [ProductRecord], ctx: &EngineContext) -> Prepared {
    let limit = ctx.config.max_characteristics_len;
    let extracted: Vec<_> = records
        .par_iter()
        .map(|r| features::extract_features(r, &ctx.brands, limit))
        .collect();

    let mut diagnostics = Vec::new();
    let features: Vec<Features> = extracted
        .into_iter()
        .zip(records.iter())
        .map(|(result, record)| {
            result.unwrap_or_else(|err| {
                let diagnostic = Diagnostic::FeatureExtraction {
                    product_id: record.id,
                    reason: err.to_string(),
                };
                tracing::warn!("{}", diagnostic.message());
                diagnostics.push(diagnostic);
                Features::default()
            })
        })
        .collect();

    let resolution = KeyResolution::resolve(&ctx.table, &features);
    let (signatures, fingerprints): (Vec<String>, Vec<Option<String>>) = features
        .par_iter()
        .map(|f| {
            (
                features::build_signature(f),
                features::compute_fingerprint(f, resolution.keys_for(&f.category)),
            )
        })
        .unzip();

    for ((record, f), fp) in records.iter_mut().zip(&features).zip(&fingerprints) {
        record.characteristics_norm = f.characteristics.clone();
        record.fingerprint = fp.clone();
    }

    Prepared {
        features,
        signatures,
        fingerprints,
        resolution,
        diagnostics,
    }
}

/// Run both passes over `records` and assemble the groups.
///
/// Every record ends up in exactly one returned group.
pub fn aggregate(
    records: &mut [ProductRecord],
    strictness: f64,
    ctx: &EngineContext,
    store: &mut dyn RepresentationStore,
    ids: &mut IdAllocator,
) -> Result<Aggregation> {
    let strictness = check_strictness(strictness)?;
    if records.is_empty() {
        return Ok(Aggregation::default());
    }

    let prepared = prepare(records, ctx);
    let mut diagnostics = prepared.diagnostics;

    let pass1 = exact::partition(&prepared.fingerprints);
    tracing::debug!(
        groups = pass1.groups.len(),
        remainder = pass1.remainder.len(),
        "exact pass done"
    );

    let remainder_signatures: Vec<String> = pass1
        .remainder
        .iter()
        .map(|&i| prepared.signatures[i].clone())
        .collect();
    let pass2 = similarity::group_remainder(&remainder_signatures, strictness, &ctx.config, store);
    diagnostics.extend(pass2.diagnostics);

    let drafts: Vec<Draft> = pass1
        .groups
        .into_iter()
        .map(|members| Draft::new(members, Origin::Exact))
        .chain(pass2.clusters.into_iter().map(|c| {
            let members = c.members.iter().map(|&j| pass1.remainder[j]).collect();
            Draft::new(members, c.origin)
        }))
        .collect();

    let groups = assemble::assemble(drafts, records, &prepared.features, &prepared.resolution, ids);
    tracing::info!(
        products = records.len(),
        groups = groups.len(),
        strictness,
        "aggregation finished"
    );

    Ok(Aggregation {
        groups,
        diagnostics,
    })
}
