use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ClusterError;

/// Sparse term-weight vector: `(term id, weight)` pairs sorted by term id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    entries: Vec<(u32, f64)>,
}

impl SparseVector {
    /// Build from unsorted pairs; duplicate ids are summed, zeros dropped.
    pub fn from_pairs(mut pairs: Vec<(u32, f64)>) -> Self {
        pairs.sort_by_key(|&(id, _)| id);
        let mut entries: Vec<(u32, f64)> = Vec::with_capacity(pairs.len());
        for (id, w) in pairs {
            match entries.last_mut() {
                Some(last) if last.0 == id => last.1 += w,
                _ => entries.push((id, w)),
            }
        }
        entries.retain(|&(_, w)| w != 0.0);
        Self { entries }
    }

    pub fn entries(&self) -> &[(u32, f64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn norm(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt()
    }

    /// Scale to unit length. Zero vectors stay zero.
    pub fn normalized(mut self) -> Self {
        let norm = self.norm();
        if norm > 0.0 {
            for (_, w) in &mut self.entries {
                *w /= norm;
            }
        }
        self
    }

    pub fn dot(&self, other: &SparseVector) -> f64 {
        let (a, b) = (&self.entries, &other.entries);
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < a.len() && j < b.len() {
            match a[i].0.cmp(&b[j].0) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += a[i].1 * b[j].1;
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }

    fn is_finite(&self) -> bool {
        self.entries.iter().all(|(_, w)| w.is_finite())
    }
}

/// Cosine similarity in [0, 1] for non-negative weights; 0 if either is zero.
pub fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    let (na, nb) = (a.norm(), b.norm());
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (a.dot(b) / (na * nb)).clamp(0.0, 1.0)
}

/// Turns product signatures into comparable vectors.
///
/// Implementations see the whole batch at once so corpus statistics
/// (document frequencies, vocabulary) can be shared.
pub trait Vectorizer {
    fn compute_representation(&self, signatures: &[String]) -> Result<Vec<SparseVector>, ClusterError>;
}

/// Linkage method for agglomerative clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Connected components of the similarity graph.
    #[default]
    Single,
    /// Mean distance between all cross pairs.
    Average,
    /// Max distance between any cross pair.
    Complete,
}

impl Linkage {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "single" => Some(Self::Single),
            "average" => Some(Self::Average),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Union-find with path compression (halving).
pub(crate) struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Smaller root wins, so roots are stable regardless of edge order.
    pub(crate) fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Cluster vectors so that items with cosine similarity >= `threshold` end up
/// together. Returns one label per input, numbered by first appearance.
///
/// Raising the threshold only ever splits clusters, never merges them.
pub fn cluster(vectors: &[SparseVector], threshold: f64, linkage: Linkage) -> Result<Vec<usize>, ClusterError> {
    let n = vectors.len();
    if n < 2 {
        return Err(ClusterError::TooFewSamples(n));
    }
    if let Some(bad) = vectors.iter().position(|v| !v.is_finite()) {
        return Err(ClusterError::NonFinite(bad));
    }

    let roots = match linkage {
        Linkage::Single => single_linkage(vectors, threshold),
        Linkage::Average | Linkage::Complete => {
            let distances = cosine_distance_matrix(vectors);
            let dendrogram = hac(&distances, n, linkage);
            cut_at_distance(&dendrogram, 1.0 - threshold)
        }
    };
    Ok(relabel(&roots))
}

fn single_linkage(vectors: &[SparseVector], threshold: f64) -> Vec<usize> {
    let n = vectors.len();
    let edges: Vec<(usize, usize)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            ((i + 1)..n)
                .filter(move |&j| cosine(&vectors[i], &vectors[j]) >= threshold)
                .map(move |j| (i, j))
        })
        .collect();

    let mut uf = UnionFind::new(n);
    for (i, j) in edges {
        uf.union(i, j);
    }
    (0..n).map(|i| uf.find(i)).collect()
}

/// Map arbitrary root ids to labels 0..k in order of first appearance.
fn relabel(roots: &[usize]) -> Vec<usize> {
    let mut label_map: HashMap<usize, usize> = HashMap::new();
    roots
        .iter()
        .map(|&r| {
            let next = label_map.len();
            *label_map.entry(r).or_insert(next)
        })
        .collect()
}

/// Merge steps of an agglomerative run.
#[derive(Debug, Clone)]
pub struct Dendrogram {
    pub merges: Vec<Merge>,
    pub n: usize,
}

/// One merge. Merge `k` creates cluster id `n + k`.
#[derive(Debug, Clone)]
pub struct Merge {
    pub cluster_a: usize,
    pub cluster_b: usize,
    pub distance: f64,
    pub size: usize,
}

/// Hierarchical agglomerative clustering over a condensed distance matrix.
///
/// `distances` holds the upper triangle, pair (i, j), i < j, at
/// `i*n - i*(i+1)/2 + j - i - 1`. Ties go to the lowest (i, j).
pub fn hac(distances: &[f64], n: usize, linkage: Linkage) -> Dendrogram {
    if n < 2 {
        return Dendrogram { merges: Vec::new(), n };
    }
    let mut dist = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = distances[condensed_index(i, j, n)];
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut active: Vec<bool> = vec![true; n];
    let mut sizes: Vec<usize> = vec![1; n];
    let mut cluster_id: Vec<usize> = (0..n).collect();
    let mut merges: Vec<Merge> = Vec::with_capacity(n - 1);

    for step in 0..(n - 1) {
        let mut best = (0, 0, f64::INFINITY);
        for i in 0..n {
            if !active[i] {
                continue;
            }
            for j in (i + 1)..n {
                if active[j] && dist[i][j] < best.2 {
                    best = (i, j, dist[i][j]);
                }
            }
        }
        let (bi, bj, best_dist) = best;
        if !best_dist.is_finite() {
            break;
        }

        let new_size = sizes[bi] + sizes[bj];
        merges.push(Merge {
            cluster_a: cluster_id[bi],
            cluster_b: cluster_id[bj],
            distance: best_dist,
            size: new_size,
        });

        for k in 0..n {
            if !active[k] || k == bi || k == bj {
                continue;
            }
            let d = match linkage {
                Linkage::Single => dist[bi][k].min(dist[bj][k]),
                Linkage::Complete => dist[bi][k].max(dist[bj][k]),
                Linkage::Average => {
                    let ni = sizes[bi] as f64;
                    let nj = sizes[bj] as f64;
                    (ni * dist[bi][k] + nj * dist[bj][k]) / (ni + nj)
                }
            };
            dist[bi][k] = d;
            dist[k][bi] = d;
        }

        active[bj] = false;
        sizes[bi] = new_size;
        cluster_id[bi] = n + step;
    }

    Dendrogram { merges, n }
}

/// Apply every merge at or below `max_distance`; returns a root per item.
///
/// Single, average and complete linkage produce non-decreasing merge
/// distances, so this is a prefix of the merge sequence.
pub fn cut_at_distance(dendrogram: &Dendrogram, max_distance: f64) -> Vec<usize> {
    let n = dendrogram.n;
    let mut parent: HashMap<usize, usize> = HashMap::new();
    for (step, merge) in dendrogram.merges.iter().enumerate() {
        if merge.distance > max_distance + 1e-12 {
            break;
        }
        parent.insert(merge.cluster_a, n + step);
        parent.insert(merge.cluster_b, n + step);
    }

    (0..n)
        .map(|mut id| {
            while let Some(&p) = parent.get(&id) {
                id = p;
            }
            id
        })
        .collect()
}

/// Condensed cosine distance matrix (1 - similarity).
pub fn cosine_distance_matrix(vectors: &[SparseVector]) -> Vec<f64> {
    let n = vectors.len();
    if n < 2 {
        return Vec::new();
    }
    (0..n)
        .into_par_iter()
        .flat_map_iter(|i| ((i + 1)..n).map(move |j| 1.0 - cosine(&vectors[i], &vectors[j])))
        .collect()
}

fn condensed_index(i: usize, j: usize, n: usize) -> usize {
    debug_assert!(i < j);
    i * n - i * (i + 1) / 2 + j - i - 1
}
