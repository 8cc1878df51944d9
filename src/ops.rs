//! Shared operation wrappers for the CLI and any other front end.
//!
//! Each `op_*` function is a synchronous wrapper around the catalog or the
//! `algo` modules. Input and output are `serde_json::Value`, errors are
//! rendered strings; no dependency on clap.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::algo::schema::{self, RawTable};
use crate::algo::{normalize, significant, string_distance};
use crate::catalog::Catalog;
use crate::config::EngineContext;
use crate::engine::{self, Aggregation};
use crate::error::Diagnostic;
use crate::model::{Group, ProductId, ProductRecord};

#[cfg(feature = "cache")]
use crate::algo::storage;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Uploaded products: typed records, or header-keyed rows still to be
/// resolved through the schema.
#[derive(Debug, Clone)]
pub enum Input {
    Records(Vec<ProductRecord>),
    Table(RawTable),
}

/// Keys a product record object may carry.
const RECORD_KEYS: &[&str] = &[
    "id",
    "external_id",
    "name",
    "model",
    "manufacturer",
    "country",
    "category_id",
    "category_name",
    "image_url",
    "characteristics",
    "characteristics_norm",
    "fingerprint",
];

fn is_record_shaped(row: &Value) -> bool {
    row.get("id").is_some_and(Value::is_u64)
        || row
            .as_object()
            .is_some_and(|obj| obj.keys().all(|k| RECORD_KEYS.contains(&k.as_str())))
}

/// Give a record object without a numeric `id` its 1-based position. A
/// non-numeric `id` is kept as the external id.
fn with_position_id(row: &Value, position: usize) -> Value {
    let mut row = row.clone();
    if let Some(obj) = row.as_object_mut() {
        if !obj.get("id").is_some_and(Value::is_u64) {
            match obj.remove("id") {
                Some(Value::Null) | None => {}
                Some(external) if !obj.contains_key("external_id") => {
                    let text = match external {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    obj.insert("external_id".into(), Value::String(text));
                }
                Some(_) => {}
            }
            obj.insert("id".into(), json!(position as ProductId));
        }
    }
    row
}

/// Classify an input document.
///
/// `{"headers": [...], "rows": [[...]]}` is a raw table. An array of
/// objects is read as records when every object has a numeric `id` or
/// only record field names as keys; records without an `id` are numbered
/// by position. Anything else is a table keyed by header aliases.
pub fn parse_input(input: &Value, ctx: &EngineContext) -> Result<Input, String> {
    if input.get("headers").is_some() && input.get("rows").is_some() {
        let table: RawTable =
            serde_json::from_value(input.clone()).map_err(|e| format!("Invalid table: {e}"))?;
        return Ok(Input::Table(table));
    }
    let rows = input
        .as_array()
        .ok_or("Expected an array of products or a {headers, rows} table")?;
    if rows.iter().all(is_record_shaped) {
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, r)| serde_json::from_value(with_position_id(r, i + 1)))
            .collect::<Result<Vec<ProductRecord>, _>>()
            .map_err(|e| format!("Invalid product record: {e}"))?;
        return Ok(Input::Records(records));
    }
    Ok(Input::Table(RawTable::from_objects(rows, &ctx.schema)))
}

fn records_of(input: &Value, ctx: &EngineContext) -> Result<(Vec<ProductRecord>, Vec<Diagnostic>), String> {
    match parse_input(input, ctx)? {
        Input::Records(records) => Ok((records, Vec::new())),
        Input::Table(table) => {
            let ingested = schema::ingest(&table, &ctx.schema).map_err(|e| e.to_string())?;
            Ok((ingested.records, ingested.diagnostics))
        }
    }
}

fn diagnostics_json(diagnostics: &[Diagnostic]) -> Value {
    Value::Array(
        diagnostics
            .iter()
            .map(|d| {
                let mut v = serde_json::to_value(d).unwrap_or(Value::Null);
                if let Some(obj) = v.as_object_mut() {
                    obj.insert("message".into(), Value::String(d.message()));
                }
                v
            })
            .collect(),
    )
}

/// Group id -> group object.
pub fn groups_json<'a>(groups: impl IntoIterator<Item = &'a Group>) -> Value {
    let map: Map<String, Value> = groups
        .into_iter()
        .map(|g| (g.id.clone(), serde_json::to_value(g).unwrap_or(Value::Null)))
        .collect();
    Value::Object(map)
}

fn aggregation_json(catalog: &Catalog, aggregation: &Aggregation) -> Value {
    json!({
        "groups": groups_json(&aggregation.groups),
        "diagnostics": diagnostics_json(&aggregation.diagnostics),
        "total_groups": catalog.groups().len(),
        "total_products": catalog.len(),
    })
}

fn group_json(catalog: &Catalog, group_id: &str) -> Value {
    catalog
        .group(group_id)
        .and_then(|g| serde_json::to_value(g).ok())
        .unwrap_or(Value::Null)
}

// ── Catalog operations ───────────────────────────────────────────────────────

/// Full aggregation: replaces the catalog contents.
pub fn op_aggregate(
    catalog: &mut Catalog,
    input: &Value,
    strictness: f64,
    ctx: &EngineContext,
) -> Result<Value, String> {
    let aggregation = match parse_input(input, ctx)? {
        Input::Records(records) => catalog.aggregate(records, strictness, ctx),
        Input::Table(table) => catalog.aggregate_table(&table, strictness, ctx),
    }
    .map_err(|e| e.to_string())?;
    Ok(aggregation_json(catalog, &aggregation))
}

pub fn op_reaggregate(catalog: &mut Catalog, strictness: f64, ctx: &EngineContext) -> Result<Value, String> {
    let aggregation = catalog.reaggregate(strictness, ctx).map_err(|e| e.to_string())?;
    Ok(aggregation_json(catalog, &aggregation))
}

pub fn op_slice(
    catalog: &mut Catalog,
    product_ids: &[ProductId],
    strictness: f64,
    ctx: &EngineContext,
) -> Result<Value, String> {
    let aggregation = catalog
        .reaggregate_slice(product_ids, strictness, ctx)
        .map_err(|e| e.to_string())?;
    Ok(aggregation_json(catalog, &aggregation))
}

pub fn op_move(catalog: &mut Catalog, product_id: ProductId, group_id: &str) -> Result<Value, String> {
    catalog.move_product(product_id, group_id).map_err(|e| e.to_string())?;
    Ok(json!({ "product_id": product_id, "group": group_json(catalog, group_id) }))
}

pub fn op_detach(catalog: &mut Catalog, product_id: ProductId) -> Result<Value, String> {
    let group_id = catalog.detach_product(product_id).map_err(|e| e.to_string())?;
    Ok(json!({ "product_id": product_id, "group": group_json(catalog, &group_id) }))
}

pub fn op_rate(catalog: &mut Catalog, group_id: &str, score: i64) -> Result<Value, String> {
    catalog.rate_group(group_id, score).map_err(|e| e.to_string())?;
    Ok(json!({ "group": group_json(catalog, group_id) }))
}

pub fn op_insert(
    catalog: &mut Catalog,
    record: &Value,
    strictness: f64,
    ctx: &EngineContext,
) -> Result<Value, String> {
    let record: ProductRecord =
        serde_json::from_value(record.clone()).map_err(|e| format!("Invalid product record: {e}"))?;
    let product_id = record.id;
    let group_id = catalog
        .insert_product(record, strictness, ctx)
        .map_err(|e| e.to_string())?;
    Ok(json!({ "product_id": product_id, "group": group_json(catalog, &group_id) }))
}

/// The full group mapping.
pub fn op_groups(catalog: &Catalog) -> Value {
    json!({
        "groups": groups_json(catalog.groups()),
        "total_groups": catalog.groups().len(),
        "total_products": catalog.len(),
    })
}

// ── Stateless operations ─────────────────────────────────────────────────────

/// Annotate each product with `_fingerprint`, `_signature`, `_model` and
/// `_brand` as the exact pass sees them.
pub fn op_fingerprint(input: &Value, ctx: &EngineContext) -> Result<Value, String> {
    let (mut records, _) = records_of(input, ctx)?;
    let prepared = engine::prepare(&mut records, ctx);

    let output: Vec<Value> = records
        .iter()
        .zip(&prepared.features)
        .zip(&prepared.signatures)
        .map(|((record, features), signature)| {
            let mut row = serde_json::to_value(record).unwrap_or(Value::Null);
            if let Some(obj) = row.as_object_mut() {
                obj.insert("_fingerprint".into(), json!(record.fingerprint));
                obj.insert("_signature".into(), Value::String(signature.clone()));
                obj.insert("_model".into(), Value::String(features.model.clone()));
                obj.insert("_brand".into(), Value::String(features.brand.clone()));
            }
            row
        })
        .collect();
    Ok(Value::Array(output))
}

/// Significant keys per category bucket, with the statistics behind them.
pub fn op_features(input: &Value, ctx: &EngineContext) -> Result<Value, String> {
    let (mut records, _) = records_of(input, ctx)?;
    let prepared = engine::prepare(&mut records, ctx);

    let mut buckets: BTreeMap<&str, Vec<_>> = BTreeMap::new();
    for f in &prepared.features {
        buckets.entry(f.category.as_str()).or_default().push(&f.characteristics);
    }

    let categories: Vec<Value> = buckets
        .into_iter()
        .map(|(category, chars)| {
            let source = if ctx.table.lookup(category).is_some() { "seed" } else { "auto" };
            json!({
                "category": category,
                "products": chars.len(),
                "source": source,
                "keys": prepared.resolution.keys_for(category).unwrap_or_default(),
                "stats": significant::key_stats(&chars),
            })
        })
        .collect();
    Ok(Value::Array(categories))
}

pub fn op_parse_characteristics(raw: &str) -> Value {
    json!(normalize::parse_characteristics(raw))
}

pub fn op_normalize_brand(raw: &str, ctx: &EngineContext) -> Value {
    json!({ "input": raw, "brand": ctx.brands.normalize(raw) })
}

pub fn op_similarity(a: &str, b: &str, metric_name: &str, all: bool) -> Result<Value, String> {
    if all {
        let mut results = Map::new();
        results.insert("a".into(), Value::String(a.into()));
        results.insert("b".into(), Value::String(b.into()));
        for name in string_distance::Metric::all_names() {
            if let Some(metric) = string_distance::Metric::from_str(name) {
                results.insert((*name).into(), json!(string_distance::similarity(a, b, metric)));
            }
        }
        Ok(Value::Object(results))
    } else {
        let metric = string_distance::Metric::from_str(metric_name).ok_or_else(|| {
            format!(
                "Unknown metric '{metric_name}'. Use: {}",
                string_distance::Metric::all_names().join(", ")
            )
        })?;
        let score = string_distance::similarity(a, b, metric);
        Ok(json!({ "a": a, "b": b, "metric": metric_name, "similarity": score }))
    }
}

// ── Cache management ─────────────────────────────────────────────────────────

pub fn op_cache_info(#[cfg_attr(not(feature = "cache"), allow(unused))] cache_path: &str) -> Result<Value, String> {
    #[cfg(feature = "cache")]
    {
        let db = storage::CacheDb::open_or_create(cache_path).map_err(|e| e.to_string())?;
        let entries = db.info().map_err(|e| e.to_string())?;
        let size = db.db_size_bytes().map_err(|e| e.to_string())?;
        return Ok(json!({
            "path": cache_path,
            "size_bytes": size,
            "total": entries.len(),
            "entries": entries,
        }));
    }

    #[cfg(not(feature = "cache"))]
    Err("Cache feature not enabled. Build with --features cache".into())
}

pub fn op_cache_clear(#[cfg_attr(not(feature = "cache"), allow(unused))] cache_path: &str) -> Result<Value, String> {
    #[cfg(feature = "cache")]
    {
        let db = storage::CacheDb::open_or_create(cache_path).map_err(|e| e.to_string())?;
        let deleted = db.clear().map_err(|e| e.to_string())?;
        return Ok(json!({ "path": cache_path, "deleted": deleted }));
    }

    #[cfg(not(feature = "cache"))]
    Err("Cache feature not enabled. Build with --features cache".into())
}
