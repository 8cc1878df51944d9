use sku_grouper::algo::schema::{RawTable, Schema};
use sku_grouper::catalog::{Catalog, EVICTION_THRESHOLD};
use sku_grouper::config::EngineContext;
use sku_grouper::error::{Diagnostic, GroupingError};
use sku_grouper::model::{Origin, ProductId, ProductRecord};

fn glove(id: ProductId, material: &str) -> ProductRecord {
    ProductRecord::new(id)
        .with_name("Перчатки рабочие")
        .with_manufacturer("ekka")
        .with_category("Перчатки трикотажные")
        .with_characteristics(&format!("материал_основы:{material};класс_вязки:13"))
}

fn catalog() -> (Catalog, EngineContext) {
    let ctx = EngineContext::default();
    let mut catalog = Catalog::new();
    catalog
        .aggregate(
            vec![
                glove(1, "нейлон"),
                glove(2, "нейлон"),
                glove(3, "полиэстер"),
                glove(4, "полиэстер"),
                glove(5, "хлопок"),
            ],
            0.7,
            &ctx,
        )
        .unwrap();
    (catalog, ctx)
}

fn table_row(id: &str, name: &str, country: &str, manufacturer: &str) -> Vec<Option<String>> {
    vec![
        Some(id.into()),
        Some(name.into()),
        None,
        None,
        Some(country.into()),
        Some(manufacturer.into()),
        Some("77".into()),
        Some("Шины".into()),
        Some("модель:Energy".into()),
    ]
}

#[test]
fn rated_group_is_dissolved_on_reaggregate() {
    let (mut catalog, ctx) = catalog();
    let gid = catalog.group_of(1).unwrap().id.clone();
    catalog.rate_group(&gid, 2).unwrap();
    assert!(2 < EVICTION_THRESHOLD);

    catalog.reaggregate(0.7, &ctx).unwrap();
    assert!(catalog.group(&gid).is_none());
    let regrouped = catalog.group_of(1).unwrap();
    assert_eq!(regrouped.members, vec![1, 2]);
    assert_ne!(regrouped.id, gid);
}

#[test]
fn moving_unknown_product_changes_nothing() {
    let (mut catalog, _) = catalog();
    let before = serde_json::to_value(&catalog).unwrap();
    let err = catalog.move_product(50, "grp_2").unwrap_err();
    assert!(matches!(err, GroupingError::ProductNotFound(50)));
    assert_eq!(serde_json::to_value(&catalog).unwrap(), before);
}

#[test]
fn moderation_round_trip() {
    let (mut catalog, ctx) = catalog();
    let nylon = catalog.group_of(1).unwrap().id.clone();

    catalog.move_product(5, &nylon).unwrap();
    assert_eq!(catalog.group(&nylon).unwrap().members, vec![1, 2, 5]);

    let manual = catalog.detach_product(5).unwrap();
    assert_eq!(catalog.group(&manual).unwrap().origin, Origin::Manual);

    catalog.reaggregate_slice(&[5], 0.7, &ctx).unwrap();
    assert!(catalog.group(&manual).is_none());
    assert_eq!(catalog.group_of(5).unwrap().members, vec![5]);

    let total: usize = catalog.groups().iter().map(|g| g.size()).sum();
    assert_eq!(total, catalog.len());
}

#[test]
fn ids_never_repeat_across_operations() {
    let (mut catalog, ctx) = catalog();
    let mut seen: Vec<String> = catalog.groups().iter().map(|g| g.id.clone()).collect();

    seen.push(catalog.detach_product(1).unwrap());
    let strop = ProductRecord::new(6)
        .with_name("Строп текстильный")
        .with_category("Стропы")
        .with_characteristics("длина:2м");
    seen.push(catalog.insert_product(strop, 0.7, &ctx).unwrap());
    let agg = catalog.reaggregate_slice(&[3, 4], 0.7, &ctx).unwrap();
    seen.extend(agg.groups.iter().map(|g| g.id.clone()));

    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), seen.len());
}

#[test]
fn insert_joins_matching_fingerprint() {
    let (mut catalog, ctx) = catalog();
    let polyester = catalog.group_of(3).unwrap().id.clone();
    let gid = catalog.insert_product(glove(9, "полиэстер"), 0.7, &ctx).unwrap();
    assert_eq!(gid, polyester);
    assert_eq!(catalog.group(&gid).unwrap().members, vec![3, 4, 9]);
}

#[test]
fn table_aggregation_reports_shifted_rows() {
    let ctx = EngineContext::default();
    let table = RawTable {
        headers: Schema::default().canonical_headers(),
        rows: vec![
            table_row("a1", "Шина 205/55R16", "Франция", "Michelin"),
            table_row("a2", "Шина 205/55R16", "Франция", "Michelin"),
            table_row("a3", "Шина 205/55R16", "Франция", "4500123"),
        ],
    };
    let mut catalog = Catalog::new();
    let agg = catalog.aggregate_table(&table, 0.7, &ctx).unwrap();

    assert!(matches!(
        &agg.diagnostics[0],
        Diagnostic::RowCorruption { count: 1, sample } if sample == &vec![2]
    ));
    assert_eq!(catalog.len(), 2);
    assert_eq!(agg.groups.len(), 1);
    assert_eq!(agg.groups[0].origin, Origin::Exact);
    assert_eq!(catalog.product(1).unwrap().external_id.as_deref(), Some("a1"));
}

#[test]
fn shifted_header_aborts_without_writes() {
    let (mut catalog, ctx) = catalog();
    let before = catalog.groups().to_vec();
    let mut headers = Schema::default().canonical_headers();
    headers.insert(0, "Unnamed: 0".into());
    let table = RawTable {
        headers,
        rows: vec![],
    };
    let err = catalog.aggregate_table(&table, 0.7, &ctx).unwrap_err();
    assert!(matches!(err, GroupingError::Schema { .. }));
    assert_eq!(catalog.groups(), before.as_slice());
}

#[test]
fn mapping_lists_every_group() {
    let (catalog, _) = catalog();
    let mapping = catalog.mapping();
    assert_eq!(mapping.len(), catalog.groups().len());
    for (id, group) in mapping {
        assert_eq!(id, group.id);
        assert!(!group.significant_features.is_empty());
    }
}
