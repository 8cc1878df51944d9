use std::collections::HashMap;

/// Output of the exact-match pass, as indices into the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExactPass {
    /// Fingerprint groups of size >= 2, ordered by first member; members in
    /// input order.
    pub groups: Vec<Vec<usize>>,
    /// Everything else, in input order.
    pub remainder: Vec<usize>,
}

/// Group products sharing a fingerprint. Unfingerprinted products and
/// unique fingerprints go to the remainder.
pub fn partition(fingerprints: &[Option<String>]) -> ExactPass {
    let mut by_fingerprint: HashMap<&str, usize> = HashMap::new();
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    let mut remainder: Vec<usize> = Vec::new();

    for (i, fp) in fingerprints.iter().enumerate() {
        match fp {
            Some(fp) => {
                let slot = *by_fingerprint.entry(fp.as_str()).or_insert_with(|| {
                    buckets.push(Vec::new());
                    buckets.len() - 1
                });
                buckets[slot].push(i);
            }
            None => remainder.push(i),
        }
    }

    let mut groups = Vec::new();
    for bucket in buckets {
        if bucket.len() >= 2 {
            groups.push(bucket);
        } else {
            remainder.extend(bucket);
        }
    }
    remainder.sort_unstable();

    ExactPass { groups, remainder }
}
