use serde_json::{json, Value};
use sku_grouper::catalog::Catalog;
use sku_grouper::config::EngineContext;
use sku_grouper::ops;

fn sample_records() -> Value {
    json!([
        {"id": 1, "name": "Шина 215/55R16", "manufacturer": "Michelin",
         "characteristics": "цвет:черный;размер:215/55R16"},
        {"id": 2, "name": "215/55R16 шина", "manufacturer": "michelin",
         "characteristics": "цвет:черный;размер:215/55R16"},
        {"id": 3, "name": "Перчатки рабочие", "manufacturer": "ekka",
         "category_name": "Перчатки", "characteristics": "материал_основы:нейлон"}
    ])
}

fn aggregated() -> (Catalog, EngineContext) {
    let ctx = EngineContext::default();
    let mut catalog = Catalog::new();
    ops::op_aggregate(&mut catalog, &sample_records(), 0.7, &ctx).unwrap();
    (catalog, ctx)
}

fn group_of(catalog: &Catalog, product: u64) -> String {
    catalog.group_of(product).unwrap().id.clone()
}

#[test]
fn ops_aggregate_returns_mapping() {
    let mut catalog = Catalog::new();
    let result = ops::op_aggregate(&mut catalog, &sample_records(), 0.7, &EngineContext::default()).unwrap();
    assert_eq!(result["total_products"], 3);
    assert_eq!(result["total_groups"], 2);
    let groups = result["groups"].as_object().unwrap();
    let exact = groups.values().find(|g| g["origin"] == "exact").unwrap();
    assert_eq!(exact["members"], json!([1, 2]));
    assert_eq!(exact["representative_id"], 1);
    assert!(exact["moderator_score"].is_null());
}

#[test]
fn ops_aggregate_empty() {
    let mut catalog = Catalog::new();
    let result = ops::op_aggregate(&mut catalog, &json!([]), 0.7, &EngineContext::default()).unwrap();
    assert_eq!(result["groups"], json!({}));
    assert_eq!(result["diagnostics"], json!([]));
}

#[test]
fn ops_aggregate_rejects_bad_strictness() {
    let mut catalog = Catalog::new();
    let result = ops::op_aggregate(&mut catalog, &sample_records(), 1.5, &EngineContext::default());
    assert!(result.unwrap_err().contains("strictness"));
}

#[test]
fn ops_aggregate_accepts_header_keyed_rows() {
    let rows = json!([
        {"ID СТЕ": "x1", "Название СТЕ": "Шина 205/55R16", "Ссылка на картинку СТЕ": null,
         "Модель": null, "Страна происхождения": "Франция", "Производитель": "Michelin",
         "ID категории": "7", "Название категории": "Шины", "Характеристики": "модель:Energy"},
        {"ID СТЕ": "x2", "Название СТЕ": "Шина 205/55R16", "Ссылка на картинку СТЕ": null,
         "Модель": null, "Страна происхождения": "Франция", "Производитель": "Michelin",
         "ID категории": "7", "Название категории": "Шины", "Характеристики": "модель:Energy"}
    ]);
    let mut catalog = Catalog::new();
    let result = ops::op_aggregate(&mut catalog, &rows, 0.7, &EngineContext::default()).unwrap();
    assert_eq!(result["total_groups"], 1);
}

#[test]
fn ops_aggregate_numbers_records_without_ids() {
    let records = json!([
        {"name": "Шина 215/55R16", "manufacturer": "Michelin",
         "characteristics": "цвет:черный;размер:215/55R16"},
        {"name": "215/55R16 шина", "manufacturer": "michelin",
         "characteristics": "цвет:черный;размер:215/55R16"}
    ]);
    let mut catalog = Catalog::new();
    let result = ops::op_aggregate(&mut catalog, &records, 0.7, &EngineContext::default()).unwrap();
    assert_eq!(result["total_groups"], 1);
    let group = result["groups"].as_object().unwrap().values().next().unwrap();
    assert_eq!(group["origin"], "exact");
    assert_eq!(group["members"], json!([1, 2]));
}

#[test]
fn ops_aggregate_keeps_string_id_as_external() {
    let records = json!([
        {"id": "sku-17", "name": "Фонарь налобный"},
        {"name": "Перчатки рабочие", "country": null}
    ]);
    let mut catalog = Catalog::new();
    let result = ops::op_aggregate(&mut catalog, &records, 0.7, &EngineContext::default()).unwrap();
    assert_eq!(result["total_products"], 2);
    assert_eq!(catalog.product(1).unwrap().external_id.as_deref(), Some("sku-17"));
    assert!(catalog.product(2).unwrap().external_id.is_none());
}

#[test]
fn ops_aggregate_accepts_partial_english_headers() {
    let rows = json!([
        {"product_id": "a1", "name": "Шина 215/55R16", "manufacturer": "Michelin",
         "characteristics": "цвет:черный;размер:215/55R16"},
        {"product_id": "a2", "name": "215/55R16 шина", "manufacturer": "michelin",
         "characteristics": "цвет:черный;размер:215/55R16"}
    ]);
    let mut catalog = Catalog::new();
    let result = ops::op_aggregate(&mut catalog, &rows, 0.7, &EngineContext::default()).unwrap();
    assert_eq!(result["total_groups"], 1);
    assert_eq!(catalog.product(2).unwrap().external_id.as_deref(), Some("a2"));
}

#[test]
fn ops_aggregate_reports_schema_error() {
    let table = json!({"headers": ["Unnamed: 0"], "rows": [["1"]]});
    let mut catalog = Catalog::new();
    let err = ops::op_aggregate(&mut catalog, &table, 0.7, &EngineContext::default()).unwrap_err();
    assert!(err.contains("schema mismatch"));
    assert!(catalog.is_empty());
}

#[test]
fn ops_rate_then_reaggregate() {
    let (mut catalog, ctx) = aggregated();
    let gid = group_of(&catalog, 1);
    let rated = ops::op_rate(&mut catalog, &gid, 1).unwrap();
    assert_eq!(rated["group"]["moderator_score"], 1);

    let result = ops::op_reaggregate(&mut catalog, 0.7, &ctx).unwrap();
    assert!(result["groups"].get(&gid).is_none());
    assert_eq!(result["total_products"], 3);
}

#[test]
fn ops_rate_out_of_range() {
    let (mut catalog, _) = aggregated();
    let gid = group_of(&catalog, 1);
    assert!(ops::op_rate(&mut catalog, &gid, 9).is_err());
}

#[test]
fn ops_move_and_detach() {
    let (mut catalog, _) = aggregated();
    let target = group_of(&catalog, 3);
    let moved = ops::op_move(&mut catalog, 2, &target).unwrap();
    assert_eq!(moved["group"]["members"], json!([3, 2]));

    let detached = ops::op_detach(&mut catalog, 2).unwrap();
    assert_eq!(detached["group"]["origin"], "manual");
    assert_eq!(detached["group"]["members"], json!([2]));
}

#[test]
fn ops_move_unknown_group() {
    let (mut catalog, _) = aggregated();
    let err = ops::op_move(&mut catalog, 1, "grp_2").unwrap_err();
    assert!(err.contains("grp_2"));
}

#[test]
fn ops_slice_unknown_product() {
    let (mut catalog, ctx) = aggregated();
    let err = ops::op_slice(&mut catalog, &[1, 42], 0.7, &ctx).unwrap_err();
    assert!(err.contains("42"));
}

#[test]
fn ops_insert_places_duplicate() {
    let (mut catalog, ctx) = aggregated();
    let record = json!({"id": 4, "name": "Шина 215/55R16", "manufacturer": "MICHELIN",
                        "characteristics": "цвет:черный;размер:215/55R16"});
    let result = ops::op_insert(&mut catalog, &record, 0.7, &ctx).unwrap();
    assert_eq!(result["group"]["members"], json!([1, 2, 4]));
}

#[test]
fn ops_groups_lists_all() {
    let (catalog, _) = aggregated();
    let result = ops::op_groups(&catalog);
    assert_eq!(result["groups"].as_object().unwrap().len(), 2);
}

#[test]
fn ops_fingerprint_adds_columns() {
    let result = ops::op_fingerprint(&sample_records(), &EngineContext::default()).unwrap();
    let arr = result.as_array().unwrap();
    assert_eq!(arr.len(), 3);
    assert_eq!(arr[0]["_fingerprint"], arr[1]["_fingerprint"]);
    assert_eq!(arr[0]["_fingerprint"].as_str().unwrap().len(), 32);
    assert_eq!(arr[0]["_model"], "215/55R16");
    assert_eq!(arr[0]["_brand"], "Michelin");
    assert!(arr[2]["_signature"].as_str().unwrap().contains("перчатки"));
}

#[test]
fn ops_features_per_category() {
    let result = ops::op_features(&sample_records(), &EngineContext::default()).unwrap();
    let arr = result.as_array().unwrap();
    let gloves = arr.iter().find(|c| c["category"] == "перчатки").unwrap();
    assert_eq!(gloves["source"], "seed");
    assert_eq!(gloves["keys"][0], "производитель");
    let other = arr.iter().find(|c| c["category"] == "").unwrap();
    assert_eq!(other["source"], "auto");
    assert_eq!(other["products"], 2);
}

#[test]
fn ops_parse_characteristics() {
    let result = ops::op_parse_characteristics("Цвет: черный; Вес = 2 кг");
    assert_eq!(result["цвет"], "черный");
    assert_eq!(result["вес"], "2 кг");
}

#[test]
fn ops_similarity_single_and_all() {
    let result = ops::op_similarity("шина michelin", "michelin шина", "signature", false).unwrap();
    assert!(result["similarity"].as_f64().unwrap() > 0.7);

    let all = ops::op_similarity("kitten", "sitting", "", true).unwrap();
    assert!(all.get("levenshtein").is_some());
    assert!(all.get("signature").is_some());

    assert!(ops::op_similarity("a", "b", "nope", false).is_err());
}

#[cfg(not(feature = "cache"))]
#[test]
fn ops_cache_needs_feature() {
    assert!(ops::op_cache_info("/tmp/none.db").is_err());
}

#[cfg(feature = "cache")]
#[test]
fn ops_cache_info_and_clear() {
    let info = ops::op_cache_info(":memory:").unwrap();
    assert_eq!(info["total"], 0);
    let cleared = ops::op_cache_clear(":memory:").unwrap();
    assert_eq!(cleared["deleted"], 0);
}
