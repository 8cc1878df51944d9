use std::collections::{BTreeSet, HashMap};

use sku_grouper::algo::cache::MemoryStore;
use sku_grouper::config::EngineContext;
use sku_grouper::engine::{self, Aggregation, IdAllocator};
use sku_grouper::error::{Diagnostic, GroupingError};
use sku_grouper::model::{Origin, ProductId, ProductRecord};

fn run(records: &[ProductRecord], strictness: f64, ctx: &EngineContext) -> Aggregation {
    let mut records = records.to_vec();
    engine::aggregate(
        &mut records,
        strictness,
        ctx,
        &mut MemoryStore::default(),
        &mut IdAllocator::default(),
    )
    .unwrap()
}

/// Fourteen products with unique fingerprints, so all of them reach pass 2.
fn mixed_batch() -> Vec<ProductRecord> {
    let names = [
        ("Перчатки рабочие нитрил серые", "ekka"),
        ("Перчатки рабочие нитрил черные", "ekka"),
        ("Перчатки рабочие нитрил белые", "ekka"),
        ("Шина летняя Michelin Energy", "Michelin"),
        ("Шина летняя Michelin Primacy", "Michelin"),
        ("Шина зимняя Hankook", "Hankook"),
        ("Строп текстильный петлевой", ""),
        ("Строп текстильный кольцевой", ""),
        ("Строп цепной", ""),
        ("Башмак противооткатный резиновый", ""),
        ("Башмак противооткатный полиуретан", ""),
        ("Колодка тормозная передняя", ""),
        ("Колодка тормозная задняя", ""),
        ("Фонарь налобный", ""),
    ];
    names
        .iter()
        .enumerate()
        .map(|(i, (name, brand))| {
            ProductRecord::new(i as ProductId + 1)
                .with_name(name)
                .with_manufacturer(brand)
                .with_characteristics(&format!("артикул:A{i}"))
        })
        .collect()
}

fn label_map(agg: &Aggregation) -> HashMap<ProductId, &str> {
    agg.groups
        .iter()
        .flat_map(|g| g.members.iter().map(move |&m| (m, g.id.as_str())))
        .collect()
}

#[test]
fn michelin_pair_is_one_exact_group() {
    let records = vec![
        ProductRecord::new(1)
            .with_name("Шина 215/55R16")
            .with_manufacturer("Michelin")
            .with_characteristics("цвет:черный;размер:215/55R16"),
        ProductRecord::new(2)
            .with_name("215/55R16 шина")
            .with_manufacturer("michelin")
            .with_characteristics("цвет:черный;размер: 215/55R16"),
    ];
    let agg = run(&records, 0.7, &EngineContext::default());
    assert_eq!(agg.groups.len(), 1);
    let group = &agg.groups[0];
    assert_eq!(group.size(), 2);
    assert_eq!(group.origin, Origin::Exact);
    assert_eq!(group.representative_id, 1);
    assert!(group.id.starts_with("exact_"));
}

#[test]
fn empty_input_gives_empty_mapping() {
    let agg = run(&[], 0.7, &EngineContext::default());
    assert!(agg.groups.is_empty());
    assert!(agg.diagnostics.is_empty());
}

#[test]
fn invalid_strictness_rejected() {
    let mut records = mixed_batch();
    let err = engine::aggregate(
        &mut records,
        f64::NAN,
        &EngineContext::default(),
        &mut MemoryStore::default(),
        &mut IdAllocator::default(),
    )
    .unwrap_err();
    assert!(matches!(err, GroupingError::InvalidStrictness(_)));
}

#[test]
fn partition_is_complete() {
    let records = mixed_batch();
    let agg = run(&records, 0.7, &EngineContext::default());

    let mut seen = BTreeSet::new();
    for group in &agg.groups {
        assert!(!group.members.is_empty());
        assert_eq!(group.members[0], group.representative_id);
        for m in &group.members {
            assert!(seen.insert(*m), "product {m} in two groups");
        }
    }
    let all: BTreeSet<ProductId> = records.iter().map(|r| r.id).collect();
    assert_eq!(seen, all);

    let ids: BTreeSet<&str> = agg.groups.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids.len(), agg.groups.len());
}

#[test]
fn aggregation_is_deterministic() {
    let records = mixed_batch();
    let ctx = EngineContext::default();
    let a = run(&records, 0.6, &ctx);
    let b = run(&records, 0.6, &ctx);
    assert_eq!(a.groups, b.groups);
}

#[test]
fn similarity_groups_only_split_as_strictness_rises() {
    let records = mixed_batch();
    let ctx = EngineContext::default();
    let steps = [0.0, 0.3, 0.6, 0.9, 1.0];
    for pair in steps.windows(2) {
        let loose = run(&records, pair[0], &ctx);
        let strict = run(&records, pair[1], &ctx);
        let loose_labels = label_map(&loose);
        for group in strict.groups.iter().filter(|g| g.origin == Origin::Similarity) {
            let first = loose_labels[&group.members[0]];
            for m in &group.members {
                assert_eq!(loose_labels[m], first, "strictness {} split differs", pair[1]);
            }
        }
    }
}

#[test]
fn size_ceiling_uses_fallback_with_diagnostic() {
    let mut ctx = EngineContext::default();
    ctx.config.max_similarity_items = 5;
    let agg = run(&mixed_batch(), 0.0, &ctx);
    assert!(agg
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::SizeCeiling { size: 14, ceiling: 5 })));
    assert!(agg.groups.iter().all(|g| g.origin == Origin::Fallback));
}

#[test]
fn small_remainder_becomes_singletons() {
    let records: Vec<ProductRecord> = mixed_batch().into_iter().take(4).collect();
    let agg = run(&records, 0.0, &EngineContext::default());
    assert_eq!(agg.groups.len(), 4);
    assert!(agg.groups.iter().all(|g| g.size() == 1 && g.origin == Origin::Fallback));
}

#[test]
fn exact_groups_come_first_and_score_higher() {
    let mut records = mixed_batch();
    let mut dup = records[0].clone();
    dup.id = 100;
    records.push(dup);
    let agg = run(&records, 0.9, &EngineContext::default());
    let first = &agg.groups[0];
    assert_eq!(first.origin, Origin::Exact);
    assert_eq!(first.members, vec![1, 100]);
    assert!(agg.groups[1..].iter().all(|g| g.origin != Origin::Exact));
}

#[test]
fn feature_failure_is_isolated() {
    let mut ctx = EngineContext::default();
    ctx.config.max_characteristics_len = 6;
    let records = vec![
        ProductRecord::new(1).with_name("Фонарь").with_characteristics("цвет:черный"),
        ProductRecord::new(2).with_name("Фонарь"),
    ];
    let agg = run(&records, 0.7, &ctx);
    assert!(agg
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::FeatureExtraction { product_id: 1, .. })));
    let total: usize = agg.groups.iter().map(|g| g.size()).sum();
    assert_eq!(total, 2);
}

#[test]
fn shared_brand_alone_is_not_exact() {
    let records = vec![
        ProductRecord::new(1).with_name("Перчатки рабочие").with_manufacturer("EKKA"),
        ProductRecord::new(2).with_name("Строп текстильный").with_manufacturer("ekka"),
        ProductRecord::new(3).with_name("Башмак противооткатный").with_manufacturer("Ekka"),
    ];
    let agg = run(&records, 1.0, &EngineContext::default());
    assert!(agg.groups.iter().all(|g| g.origin != Origin::Exact));
    assert_eq!(agg.groups.len(), 3);
    assert!(agg.groups.iter().all(|g| g.size() == 1));
}
