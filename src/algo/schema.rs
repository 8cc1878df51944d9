//! Field mapping and column-shift detection for raw catalog tables.
//!
//! Raw rows are resolved once into fixed-shape [`ProductRecord`]s here; no
//! other module looks fields up by header name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Diagnostic, GroupingError, Result};
use crate::model::ProductRecord;

/// Manufacturer cells holding an all-digit value above this are category ids.
const MANUFACTURER_ID_LIMIT: u64 = 100_000;
/// Country cells longer than this hold shifted free text.
const COUNTRY_MAX_CHARS: usize = 50;
/// Offending row indices reported in a row-corruption diagnostic.
const SAMPLE_ROWS: usize = 5;

/// Fixed-shape target fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    Name,
    ImageUrl,
    Model,
    Country,
    Manufacturer,
    CategoryId,
    CategoryName,
    Characteristics,
}

/// One expected column: target field plus accepted header spellings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub field: Field,
    pub aliases: Vec<String>,
}

impl Column {
    fn new(field: Field, aliases: &[&str]) -> Self {
        Self {
            field,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn accepts(&self, header: &str) -> bool {
        let h = header.trim().to_lowercase();
        self.aliases.iter().any(|a| a.to_lowercase() == h)
    }
}

/// Expected ordered schema of an uploaded catalog table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            columns: vec![
                Column::new(Field::Id, &["id сте", "id", "product_id"]),
                Column::new(Field::Name, &["название сте", "name"]),
                Column::new(Field::ImageUrl, &["ссылка на картинку сте", "image_url"]),
                Column::new(Field::Model, &["модель", "model"]),
                Column::new(Field::Country, &["страна происхождения", "country"]),
                Column::new(Field::Manufacturer, &["производитель", "manufacturer"]),
                Column::new(Field::CategoryId, &["id категории", "category_id"]),
                Column::new(Field::CategoryName, &["название категории", "category_name"]),
                Column::new(Field::Characteristics, &["характеристики", "characteristics"]),
            ],
        }
    }
}

impl Schema {
    pub fn position(&self, field: Field) -> Option<usize> {
        self.columns.iter().position(|c| c.field == field)
    }

    /// Canonical (first alias) header of every column, in order.
    pub fn canonical_headers(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.aliases.first().cloned().unwrap_or_default())
            .collect()
    }
}

/// A raw table: headers plus rows of nullable cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Build a table from JSON objects by alias lookup.
    ///
    /// Object keys carry no order, so a column absent from every object is
    /// a column of nulls under its canonical header. When no key matches
    /// any column the headers stay empty and the schema check rejects the
    /// batch.
    pub fn from_objects(objects: &[Value], schema: &Schema) -> Self {
        let keys: Vec<Option<String>> = schema
            .columns
            .iter()
            .map(|column| {
                objects.iter().find_map(|obj| {
                    obj.as_object()?
                        .keys()
                        .find(|k| column.accepts(k))
                        .cloned()
                })
            })
            .collect();
        let headers = if keys.iter().all(Option::is_none) {
            vec![String::new(); schema.columns.len()]
        } else {
            keys.iter()
                .zip(schema.canonical_headers())
                .map(|(key, canonical)| key.clone().unwrap_or(canonical))
                .collect()
        };

        let rows = objects
            .iter()
            .map(|obj| {
                keys.iter()
                    .map(|key| key.as_ref().and_then(|k| obj.get(k)).and_then(cell_text))
                    .collect()
            })
            .collect();

        Self { headers, rows }
    }
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Outcome of column-shift detection.
#[derive(Debug, Clone, PartialEq)]
pub enum ShiftReport {
    /// Headers do not match the schema: reject the whole batch.
    WholeTable {
        expected: Vec<String>,
        found: Vec<String>,
    },
    /// Indices of rows whose cells look shifted (may be empty).
    Rows(Vec<usize>),
}

/// Validate headers against the schema, then flag individually shifted rows.
pub fn detect_column_shift(
    schema: &Schema,
    headers: &[String],
    rows: &[Vec<Option<String>>],
) -> ShiftReport {
    let headers_match = headers.len() >= schema.columns.len()
        && schema
            .columns
            .iter()
            .zip(headers)
            .all(|(column, header)| column.accepts(header));
    if !headers_match {
        return ShiftReport::WholeTable {
            expected: schema.canonical_headers(),
            found: headers
                .iter()
                .take(schema.columns.len())
                .map(|h| h.trim().to_lowercase())
                .collect(),
        };
    }

    let manufacturer = schema.position(Field::Manufacturer);
    let country = schema.position(Field::Country);
    let shifted = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            let cell = |pos: Option<usize>| pos.and_then(|p| row.get(p)).and_then(|c| c.as_deref());
            looks_like_category_id(cell(manufacturer)) || looks_like_free_text(cell(country))
        })
        .map(|(i, _)| i)
        .collect();
    ShiftReport::Rows(shifted)
}

fn looks_like_category_id(cell: Option<&str>) -> bool {
    let Some(value) = cell.map(str::trim) else {
        return false;
    };
    !value.is_empty()
        && value.chars().all(|c| c.is_ascii_digit())
        && value.parse::<u64>().map_or(true, |n| n > MANUFACTURER_ID_LIMIT)
}

fn looks_like_free_text(cell: Option<&str>) -> bool {
    cell.is_some_and(|v| v.chars().count() > COUNTRY_MAX_CHARS)
}

/// Records resolved from a raw table plus non-fatal diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub records: Vec<ProductRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolve a raw table into product records.
///
/// A whole-table shift is a [`GroupingError::Schema`]; shifted rows are
/// excluded and reported. Record ids are 1-based row positions.
pub fn ingest(table: &RawTable, schema: &Schema) -> Result<Ingested> {
    let shifted = match detect_column_shift(schema, &table.headers, &table.rows) {
        ShiftReport::WholeTable { expected, found } => {
            return Err(GroupingError::Schema { expected, found });
        }
        ShiftReport::Rows(rows) => rows,
    };

    let mut diagnostics = Vec::new();
    if !shifted.is_empty() {
        let diagnostic = Diagnostic::RowCorruption {
            count: shifted.len(),
            sample: shifted.iter().take(SAMPLE_ROWS).copied().collect(),
        };
        tracing::warn!("{}", diagnostic.message());
        diagnostics.push(diagnostic);
    }

    let mut records = Vec::with_capacity(table.rows.len() - shifted.len());
    for (i, row) in table.rows.iter().enumerate() {
        if shifted.binary_search(&i).is_ok() || is_blank(row) {
            continue;
        }
        let cell = |field: Field| -> Option<String> {
            let pos = schema.position(field)?;
            let text = row.get(pos)?.as_deref()?.trim();
            (!text.is_empty()).then(|| text.to_string())
        };
        records.push(ProductRecord {
            id: i as u64 + 1,
            external_id: cell(Field::Id),
            name: cell(Field::Name),
            model: cell(Field::Model),
            manufacturer: cell(Field::Manufacturer),
            country: cell(Field::Country),
            category_id: cell(Field::CategoryId),
            category_name: cell(Field::CategoryName),
            image_url: cell(Field::ImageUrl),
            characteristics_raw: cell(Field::Characteristics),
            ..ProductRecord::default()
        });
    }

    Ok(Ingested {
        records,
        diagnostics,
    })
}

fn is_blank(row: &[Option<String>]) -> bool {
    row.iter()
        .all(|c| c.as_deref().map_or(true, |s| s.trim().is_empty()))
}
