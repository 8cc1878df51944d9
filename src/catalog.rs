//! Catalog state and incremental updates.
//!
//! A [`Catalog`] owns products, groups and the id sequence. Every mutating
//! operation takes `&mut self`, validates its arguments first and leaves the
//! catalog untouched on error.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::algo::cache::{MemoryStore, RepresentationStore};
use crate::algo::features::{self, Features};
use crate::algo::normalize;
use crate::algo::schema::{self, RawTable};
use crate::algo::significant::KeyResolution;
use crate::algo::string_distance;
use crate::config::EngineContext;
use crate::engine::{self, assemble, similarity, Aggregation, IdAllocator};
use crate::error::{GroupingError, Result};
use crate::model::{Group, Origin, ProductId, ProductRecord};

/// Groups rated below this are dissolved by `reaggregate`.
pub const EVICTION_THRESHOLD: u8 = 3;

pub struct Catalog {
    products: Vec<ProductRecord>,
    positions: HashMap<ProductId, usize>,
    groups: Vec<Group>,
    membership: HashMap<ProductId, String>,
    ids: IdAllocator,
    store: Box<dyn RepresentationStore + Send>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("products", &self.products.len())
            .field("groups", &self.groups.len())
            .field("ids", &self.ids)
            .finish()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            products: Vec::new(),
            positions: HashMap::new(),
            groups: Vec::new(),
            membership: HashMap::new(),
            ids: IdAllocator::default(),
            store: Box::new(MemoryStore::default()),
        }
    }

    /// Use another representation store (e.g. the SQLite cache).
    pub fn with_store(mut self, store: Box<dyn RepresentationStore + Send>) -> Self {
        self.store = store;
        self
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn products(&self) -> &[ProductRecord] {
        &self.products
    }

    pub fn product(&self, id: ProductId) -> Option<&ProductRecord> {
        self.positions.get(&id).map(|&i| &self.products[i])
    }

    /// Groups in creation order.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn group_of(&self, product_id: ProductId) -> Option<&Group> {
        self.membership.get(&product_id).and_then(|gid| self.group(gid))
    }

    /// Group id -> group.
    pub fn mapping(&self) -> BTreeMap<&str, &Group> {
        self.groups.iter().map(|g| (g.id.as_str(), g)).collect()
    }

    // ── Aggregation ─────────────────────────────────────────────────────────

    /// Replace the catalog with `records` and a fresh aggregation.
    pub fn aggregate(
        &mut self,
        records: Vec<ProductRecord>,
        strictness: f64,
        ctx: &EngineContext,
    ) -> Result<Aggregation> {
        engine::check_strictness(strictness)?;
        let positions = index_products(&records)?;

        let mut records = records;
        let mut ids = IdAllocator::default();
        let aggregation = engine::aggregate(&mut records, strictness, ctx, self.store.as_mut(), &mut ids)?;

        self.products = records;
        self.positions = positions;
        self.groups = aggregation.groups.clone();
        self.ids = ids;
        self.rebuild_membership();
        Ok(aggregation)
    }

    /// Resolve a raw table through the context's schema, then aggregate.
    /// A whole-table column shift aborts before anything changes.
    pub fn aggregate_table(
        &mut self,
        table: &RawTable,
        strictness: f64,
        ctx: &EngineContext,
    ) -> Result<Aggregation> {
        engine::check_strictness(strictness)?;
        let ingested = schema::ingest(table, &ctx.schema)?;
        let mut aggregation = self.aggregate(ingested.records, strictness, ctx)?;
        let mut diagnostics = ingested.diagnostics;
        diagnostics.append(&mut aggregation.diagnostics);
        aggregation.diagnostics = diagnostics;
        Ok(aggregation)
    }

    /// Dissolve groups rated below [`EVICTION_THRESHOLD`] and regroup their
    /// members. Other groups are left as they are.
    pub fn reaggregate(&mut self, strictness: f64, ctx: &EngineContext) -> Result<Aggregation> {
        engine::check_strictness(strictness)?;
        let evicted: HashSet<String> = self
            .groups
            .iter()
            .filter(|g| g.moderator_score.is_some_and(|s| s < EVICTION_THRESHOLD))
            .map(|g| g.id.clone())
            .collect();
        let released: Vec<ProductId> = self
            .products
            .iter()
            .map(|p| p.id)
            .filter(|id| self.membership.get(id).map_or(true, |g| evicted.contains(g)))
            .collect();
        tracing::info!(
            evicted = evicted.len(),
            released = released.len(),
            "reaggregating low-rated groups"
        );

        let aggregation = self.regroup(&released, strictness, ctx)?;
        self.groups.retain(|g| !evicted.contains(&g.id));
        self.commit(&aggregation);
        Ok(aggregation)
    }

    /// Pull exactly `product_ids` out of their groups and regroup only them.
    pub fn reaggregate_slice(
        &mut self,
        product_ids: &[ProductId],
        strictness: f64,
        ctx: &EngineContext,
    ) -> Result<Aggregation> {
        engine::check_strictness(strictness)?;
        if let Some(&missing) = product_ids.iter().find(|id| !self.positions.contains_key(id)) {
            return Err(GroupingError::ProductNotFound(missing));
        }
        let wanted: HashSet<ProductId> = product_ids.iter().copied().collect();
        let slice: Vec<ProductId> = self
            .products
            .iter()
            .map(|p| p.id)
            .filter(|id| wanted.contains(id))
            .collect();

        let aggregation = self.regroup(&slice, strictness, ctx)?;
        self.detach_members(&wanted);
        self.commit(&aggregation);
        Ok(aggregation)
    }

    /// Run the pipeline over catalog products `ids` (in catalog order)
    /// without touching catalog groups. Normalized fields are written back.
    fn regroup(&mut self, ids: &[ProductId], strictness: f64, ctx: &EngineContext) -> Result<Aggregation> {
        let mut records: Vec<ProductRecord> = ids
            .iter()
            .filter_map(|id| self.product(*id).cloned())
            .collect();
        let aggregation =
            engine::aggregate(&mut records, strictness, ctx, self.store.as_mut(), &mut self.ids)?;
        for record in records {
            if let Some(&i) = self.positions.get(&record.id) {
                self.products[i] = record;
            }
        }
        Ok(aggregation)
    }

    fn commit(&mut self, aggregation: &Aggregation) {
        self.groups.extend(aggregation.groups.iter().cloned());
        self.rebuild_membership();
    }

    // ── Manual edits ────────────────────────────────────────────────────────

    /// Move a product into another group without re-clustering.
    pub fn move_product(&mut self, product_id: ProductId, target_group_id: &str) -> Result<()> {
        if !self.positions.contains_key(&product_id) {
            return Err(GroupingError::ProductNotFound(product_id));
        }
        let target = self
            .group_index(target_group_id)
            .ok_or_else(|| GroupingError::GroupNotFound(target_group_id.to_string()))?;
        if self.membership.get(&product_id).map(String::as_str) == Some(target_group_id) {
            return Ok(());
        }

        self.detach_members(&HashSet::from([product_id]));
        let target = self.group_index(target_group_id).unwrap_or(target);
        let group = &mut self.groups[target];
        group.members.push(product_id);
        group.refresh();
        self.membership.insert(product_id, target_group_id.to_string());
        tracing::debug!(product_id, group = target_group_id, "product moved");
        Ok(())
    }

    /// Put a product into a new `manual` singleton group. Returns its id.
    pub fn detach_product(&mut self, product_id: ProductId) -> Result<String> {
        let record = self
            .product(product_id)
            .ok_or(GroupingError::ProductNotFound(product_id))?;
        let name = assemble::group_name(record);

        self.detach_members(&HashSet::from([product_id]));
        let group = self.singleton(product_id, name, Origin::Manual, Vec::new());
        let id = group.id.clone();
        self.groups.push(group);
        self.membership.insert(product_id, id.clone());
        Ok(id)
    }

    /// Record a 1-5 moderator score.
    pub fn rate_group(&mut self, group_id: &str, score: i64) -> Result<()> {
        let idx = self
            .group_index(group_id)
            .ok_or_else(|| GroupingError::GroupNotFound(group_id.to_string()))?;
        let score = u8::try_from(score)
            .ok()
            .filter(|s| (1..=5).contains(s))
            .ok_or(GroupingError::InvalidScore(score))?;
        self.groups[idx].moderator_score = Some(score);
        Ok(())
    }

    /// Add one product and place it without re-running the batch passes:
    /// the group of a same-category product with the same fingerprint,
    /// else the group whose representative signature is closest at or above
    /// the strictness threshold, else a new singleton. Returns the group id.
    pub fn insert_product(
        &mut self,
        mut record: ProductRecord,
        strictness: f64,
        ctx: &EngineContext,
    ) -> Result<String> {
        engine::check_strictness(strictness)?;
        if self.positions.contains_key(&record.id) {
            return Err(GroupingError::DuplicateProduct(record.id));
        }
        let limit = ctx.config.max_characteristics_len;
        let new_features = features::extract_features(&record, &ctx.brands, limit).unwrap_or_else(|err| {
            tracing::warn!(product_id = record.id, "{err}; treated as empty");
            Features::default()
        });

        // Category peers decide which characteristics are significant.
        let peers: Vec<(ProductId, Features)> = self
            .products
            .iter()
            .filter(|p| normalize::clean_text(p.category_name.as_deref().unwrap_or("")) == new_features.category)
            .filter_map(|p| {
                features::extract_features(p, &ctx.brands, limit)
                    .ok()
                    .map(|f| (p.id, f))
            })
            .collect();
        let mut batch: Vec<Features> = peers.iter().map(|(_, f)| f.clone()).collect();
        batch.push(new_features.clone());
        let resolution = KeyResolution::resolve(&ctx.table, &batch);
        let keys = resolution.keys_for(&new_features.category);

        record.characteristics_norm = new_features.characteristics.clone();
        record.fingerprint = features::compute_fingerprint(&new_features, keys);

        let by_fingerprint = record.fingerprint.as_ref().and_then(|fp| {
            peers
                .iter()
                .find(|(_, f)| features::compute_fingerprint(f, keys).as_ref() == Some(fp))
                .and_then(|(id, _)| self.membership.get(id).cloned())
        });
        let placed = by_fingerprint.or_else(|| self.closest_group(&new_features, strictness, ctx));

        let product_id = record.id;
        let name = assemble::group_name(&record);
        self.positions.insert(product_id, self.products.len());
        self.products.push(record);

        let group_id = match placed.and_then(|gid| self.group_index(&gid)) {
            Some(idx) => {
                let group = &mut self.groups[idx];
                group.members.push(product_id);
                group.refresh();
                group.id.clone()
            }
            None => {
                // No clustering ran, same as a remainder too small for pass 2.
                let significant = keys.map(<[String]>::to_vec).unwrap_or_default();
                let group = self.singleton(product_id, name, Origin::Fallback, significant);
                let id = group.id.clone();
                self.groups.push(group);
                id
            }
        };
        self.membership.insert(product_id, group_id.clone());
        tracing::debug!(product_id, group = %group_id, "product inserted");
        Ok(group_id)
    }

    fn closest_group(&self, target: &Features, strictness: f64, ctx: &EngineContext) -> Option<String> {
        let signature = features::build_signature(target);
        if signature.is_empty() {
            return None;
        }
        let threshold = similarity::threshold_for(strictness);
        let limit = ctx.config.max_characteristics_len;

        let mut best: Option<(f64, &str)> = None;
        for group in &self.groups {
            let Some(rep) = self.product(group.representative_id) else {
                continue;
            };
            let Ok(rep_features) = features::extract_features(rep, &ctx.brands, limit) else {
                continue;
            };
            let score = string_distance::signature_similarity(&signature, &features::build_signature(&rep_features));
            if score >= threshold && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, group.id.as_str()));
            }
        }
        best.map(|(_, id)| id.to_string())
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn group_index(&self, id: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.id == id)
    }

    fn singleton(&mut self, product_id: ProductId, name: String, origin: Origin, significant: Vec<String>) -> Group {
        Group {
            id: self.ids.allocate(origin),
            name,
            representative_id: product_id,
            members: vec![product_id],
            score: crate::model::group_score(origin, 1),
            moderator_score: None,
            significant_features: significant,
            origin,
        }
    }

    /// Remove products from their groups. Emptied groups disappear; groups
    /// that lost their representative take the next member and are renamed.
    fn detach_members(&mut self, products: &HashSet<ProductId>) {
        let affected: HashSet<String> = products
            .iter()
            .filter_map(|id| self.membership.get(id).cloned())
            .collect();
        for group in self.groups.iter_mut().filter(|g| affected.contains(&g.id)) {
            let old_rep = group.representative_id;
            group.members.retain(|m| !products.contains(m));
            group.refresh();
            if group.representative_id != old_rep {
                if let Some(rep) = self.positions.get(&group.representative_id).map(|&i| &self.products[i]) {
                    group.name = assemble::group_name(rep);
                }
            }
        }
        self.groups.retain(|g| !g.members.is_empty());
        for id in products {
            self.membership.remove(id);
        }
    }

    fn rebuild_membership(&mut self) {
        self.membership = self
            .groups
            .iter()
            .flat_map(|g| g.members.iter().map(move |&m| (m, g.id.clone())))
            .collect();
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    /// Rebuild a catalog from persisted state, checking that groups
    /// partition the products.
    pub fn from_state(state: CatalogState) -> Result<Self> {
        let positions = index_products(&state.products).map_err(|e| GroupingError::State(e.to_string()))?;

        let mut ids = state.ids;
        let mut seen_groups: HashSet<&str> = HashSet::new();
        let mut seen_products: HashSet<ProductId> = HashSet::new();
        for group in &state.groups {
            if !seen_groups.insert(group.id.as_str()) {
                return Err(GroupingError::State(format!("duplicate group id {}", group.id)));
            }
            if group.members.is_empty() {
                return Err(GroupingError::State(format!("group {} is empty", group.id)));
            }
            for member in &group.members {
                if !positions.contains_key(member) {
                    return Err(GroupingError::State(format!(
                        "group {} references unknown product {member}",
                        group.id
                    )));
                }
                if !seen_products.insert(*member) {
                    return Err(GroupingError::State(format!("product {member} is in two groups")));
                }
            }
            ids.observe(&group.id);
        }
        if let Some(orphan) = state.products.iter().find(|p| !seen_products.contains(&p.id)) {
            return Err(GroupingError::State(format!("product {} has no group", orphan.id)));
        }

        let mut catalog = Self {
            products: state.products,
            positions,
            groups: state.groups,
            membership: HashMap::new(),
            ids,
            store: Box::new(MemoryStore::default()),
        };
        catalog.rebuild_membership();
        Ok(catalog)
    }
}

fn index_products(records: &[ProductRecord]) -> Result<HashMap<ProductId, usize>> {
    let mut positions = HashMap::with_capacity(records.len());
    for (i, r) in records.iter().enumerate() {
        if positions.insert(r.id, i).is_some() {
            return Err(GroupingError::DuplicateProduct(r.id));
        }
    }
    Ok(positions)
}

/// Serialized form of a catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogState {
    pub products: Vec<ProductRecord>,
    pub groups: Vec<Group>,
    #[serde(default)]
    pub ids: IdAllocator,
}

#[derive(Serialize)]
struct CatalogStateRef<'a> {
    products: &'a [ProductRecord],
    groups: &'a [Group],
    ids: &'a IdAllocator,
}

impl Serialize for Catalog {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        CatalogStateRef {
            products: &self.products,
            groups: &self.groups,
            ids: &self.ids,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Catalog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let state = CatalogState::deserialize(deserializer)?;
        Catalog::from_state(state).map_err(serde::de::Error::custom)
    }
}
