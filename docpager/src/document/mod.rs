// Documents, find criteria and the field-level rules applied to them

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A document as handed over by the database driver: an ordered JSON object.
pub type Document = Map<String, Value>;

/// Name of the identity field every document carries.
pub const ID_FIELD: &str = "_id";

/// Sort direction of a single sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One `field: order` entry of a sort specification. Sort keys are ordered,
/// so they are kept in a list rather than a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        SortKey {
            field: field.to_string(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(field: &str) -> Self {
        SortKey {
            field: field.to_string(),
            order: SortOrder::Descending,
        }
    }
}

/// The criteria of a find query: filter, projection and sort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindCriteria {
    #[serde(default)]
    pub filter: Document,
    #[serde(default)]
    pub projection: Document,
    #[serde(default)]
    pub sort: Vec<SortKey>,
}

impl FindCriteria {
    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }
}

/// Build a document from a JSON object literal. Non-object values yield an
/// empty document.
pub fn from_json(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Look up a possibly dotted field path (`address.city`) in a document.
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Whether the document satisfies an equality filter. Every filter entry must
/// match the value found at its (possibly dotted) path; a `null` filter value
/// also matches a missing field.
pub fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(path, expected)| match lookup_path(doc, path) {
        Some(actual) => actual == expected,
        None => expected.is_null(),
    })
}

/// A projection value that hides its field: `0`, `false` or `null`.
fn is_excluding(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// How a projection selects fields.
enum ProjectionMode<'a> {
    All,
    Include(&'a Document),
    Exclude(&'a Document),
}

fn projection_mode(projection: &Document) -> ProjectionMode<'_> {
    if projection.is_empty() {
        return ProjectionMode::All;
    }
    let includes = projection
        .iter()
        .any(|(key, value)| key != ID_FIELD && !is_excluding(value));
    if includes {
        ProjectionMode::Include(projection)
    } else {
        ProjectionMode::Exclude(projection)
    }
}

/// Apply a projection the way the database does when returning documents:
/// inclusion mode keeps the listed fields plus `_id`, exclusion mode drops the
/// listed fields. `_id` is only dropped when explicitly excluded.
pub fn apply_projection(doc: &Document, projection: &Document) -> Document {
    let id_hidden = projection.get(ID_FIELD).map(is_excluding).unwrap_or(false);
    match projection_mode(projection) {
        ProjectionMode::All => doc.clone(),
        ProjectionMode::Include(fields) => doc
            .iter()
            .filter(|(key, _)| {
                if key.as_str() == ID_FIELD {
                    !id_hidden
                } else {
                    fields.get(key.as_str()).map(|v| !is_excluding(v)).unwrap_or(false)
                }
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        ProjectionMode::Exclude(fields) => doc
            .iter()
            .filter(|(key, _)| !fields.contains_key(key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

/// Remove from an edited document every field the projection hides, so an
/// edit made through a projected result cannot reintroduce hidden fields.
/// The identity field is always kept.
pub fn strip_excluded_fields(doc: &mut Document, projection: &Document) {
    let hidden: Vec<String> = match projection_mode(projection) {
        ProjectionMode::All => return,
        ProjectionMode::Include(fields) => doc
            .keys()
            .filter(|key| key.as_str() != ID_FIELD)
            .filter(|key| fields.get(key.as_str()).map(is_excluding).unwrap_or(true))
            .cloned()
            .collect(),
        ProjectionMode::Exclude(fields) => doc
            .keys()
            .filter(|key| key.as_str() != ID_FIELD && fields.contains_key(key.as_str()))
            .cloned()
            .collect(),
    };
    for key in hidden {
        doc.shift_remove(&key);
    }
}

/// Rank of a JSON type in the cross-type sort order.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values used for sorting results.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (x, y) if type_rank(x) == type_rank(y) => x.to_string().cmp(&y.to_string()),
        (x, y) => type_rank(x).cmp(&type_rank(y)),
    }
}

/// Compare two documents by a sort specification. Missing fields sort as null.
pub fn compare_by_sort(a: &Document, b: &Document, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let left = lookup_path(a, &key.field).unwrap_or(&Value::Null);
        let right = lookup_path(b, &key.field).unwrap_or(&Value::Null);
        let ordering = match key.order {
            SortOrder::Ascending => compare_values(left, right),
            SortOrder::Descending => compare_values(right, left),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Return a copy of the document with its keys (and nested keys) in
/// alphabetical order, for display with the "sort fields" preference.
pub fn sort_fields(doc: &Document) -> Document {
    let mut keys: Vec<&String> = doc.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| (key.clone(), sort_value_fields(&doc[key.as_str()])))
        .collect()
}

fn sort_value_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sort_fields(map)),
        Value::Array(items) => Value::Array(items.iter().map(sort_value_fields).collect()),
        other => other.clone(),
    }
}
