use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ProductId = u64;

/// A catalog row resolved into a fixed shape.
///
/// Raw fields stay nullable; `characteristics` and `fingerprint` are filled
/// in when the product is aggregated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Raw characteristics string as supplied upstream.
    #[serde(default, rename = "characteristics")]
    pub characteristics_raw: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub characteristics_norm: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl ProductRecord {
    pub fn new(id: ProductId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: &str) -> Self {
        self.manufacturer = Some(manufacturer.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category_name = Some(category.to_string());
        self
    }

    pub fn with_characteristics(mut self, raw: &str) -> Self {
        self.characteristics_raw = Some(raw.to_string());
        self
    }
}

/// How a group came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Exact,
    Similarity,
    Fallback,
    Manual,
}

impl Origin {
    /// Prefix of group ids allocated for this origin.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Similarity => "sim",
            Self::Fallback => "fb",
            Self::Manual => "manual",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Similarity => "similarity",
            Self::Fallback => "fallback",
            Self::Manual => "manual",
        }
    }

    /// Confidence weight used by group scoring.
    /// Exact >= Similarity >= Fallback.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Exact => 1.0,
            Self::Manual => 0.95,
            Self::Similarity => 0.85,
            Self::Fallback => 0.6,
        }
    }
}

/// A group of equivalent SKUs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub representative_id: ProductId,
    /// Representative first, then remaining members in stable input order.
    pub members: Vec<ProductId>,
    pub score: f64,
    #[serde(default)]
    pub moderator_score: Option<u8>,
    #[serde(default)]
    pub significant_features: Vec<String>,
    pub origin: Origin,
}

impl Group {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Recompute representative and score after membership changed.
    pub fn refresh(&mut self) {
        if let Some(&first) = self.members.first() {
            self.representative_id = first;
        }
        self.score = group_score(self.origin, self.members.len());
    }
}

/// Score is monotonic in size and ranks origins by `Origin::weight`.
pub fn group_score(origin: Origin, size: usize) -> f64 {
    let size = size as f64;
    origin.weight() * size / (size + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_monotonic_in_size() {
        for origin in [Origin::Exact, Origin::Similarity, Origin::Fallback, Origin::Manual] {
            let mut prev = 0.0;
            for size in 1..20 {
                let s = group_score(origin, size);
                assert!(s > prev, "{origin:?} size {size}");
                prev = s;
            }
        }
    }

    #[test]
    fn score_ranks_origins() {
        for size in 1..10 {
            let exact = group_score(Origin::Exact, size);
            let sim = group_score(Origin::Similarity, size);
            let fb = group_score(Origin::Fallback, size);
            assert!(exact >= sim && sim >= fb);
        }
    }

    #[test]
    fn origin_serializes_lowercase() {
        let v = serde_json::to_value(Origin::Similarity).unwrap();
        assert_eq!(v, "similarity");
        let o: Origin = serde_json::from_value(serde_json::json!("fallback")).unwrap();
        assert_eq!(o, Origin::Fallback);
    }

    #[test]
    fn refresh_moves_representative() {
        let mut g = Group {
            id: "exact_0".into(),
            name: "x".into(),
            representative_id: 1,
            members: vec![2, 3],
            score: 0.0,
            moderator_score: None,
            significant_features: vec![],
            origin: Origin::Exact,
        };
        g.refresh();
        assert_eq!(g.representative_id, 2);
        assert!((g.score - group_score(Origin::Exact, 2)).abs() < 1e-12);
    }

    #[test]
    fn record_reads_characteristics_field() {
        let r: ProductRecord = serde_json::from_value(serde_json::json!({
            "id": 3,
            "name": "Перчатки",
            "characteristics": "цвет:серый"
        }))
        .unwrap();
        assert_eq!(r.characteristics_raw.as_deref(), Some("цвет:серый"));
        assert!(r.model.is_none());
    }
}
