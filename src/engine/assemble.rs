use crate::algo::features::Features;
use crate::algo::significant::KeyResolution;
use crate::model::{group_score, Group, Origin, ProductRecord};

use super::IdAllocator;

/// A group before it has an id: member indices plus origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub members: Vec<usize>,
    pub origin: Origin,
}

impl Draft {
    pub fn new(members: Vec<usize>, origin: Origin) -> Self {
        Self { members, origin }
    }
}

/// Turn drafts into groups in draft order. Indices refer to `records` and
/// `features`; members are kept in input order so the representative is the
/// earliest product.
pub fn assemble(
    drafts: Vec<Draft>,
    records: &[ProductRecord],
    features: &[Features],
    resolution: &KeyResolution,
    ids: &mut IdAllocator,
) -> Vec<Group> {
    drafts
        .into_iter()
        .filter(|d| !d.members.is_empty())
        .map(|mut draft| {
            draft.members.sort_unstable();
            let rep = draft.members[0];
            let significant_features = resolution
                .keys_for(&features[rep].category)
                .map(<[String]>::to_vec)
                .unwrap_or_default();
            Group {
                id: ids.allocate(draft.origin),
                name: group_name(&records[rep]),
                representative_id: records[rep].id,
                members: draft.members.iter().map(|&i| records[i].id).collect(),
                score: group_score(draft.origin, draft.members.len()),
                moderator_score: None,
                significant_features,
                origin: draft.origin,
            }
        })
        .collect()
}

/// Raw name, else model, else `product <id>`.
pub fn group_name(record: &ProductRecord) -> String {
    [&record.name, &record.model]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("product {}", record.id))
}
