pub mod sqlite;

pub use sqlite::SqliteSource;

use crate::document::{
    apply_projection, compare_by_sort, matches_filter, Document, FindCriteria, ID_FIELD,
};
use crate::error::Result;
use crate::query::{DocumentCursor, DocumentSource};
use crate::sync::lock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Assign a fresh `_id` to a document that has none and return its id as text.
pub(crate) fn ensure_id(doc: &mut Document) -> String {
    match doc.get(ID_FIELD) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    }
}

/// An in-process document source keeping each namespace as a list of
/// documents in insertion order.
pub struct MemorySource {
    namespaces: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource {
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    /// Append a document, assigning an `_id` if it has none. Returns the id.
    pub fn insert(&self, namespace: &str, mut doc: Document) -> String {
        let id = ensure_id(&mut doc);
        lock(&self.namespaces)
            .entry(namespace.to_string())
            .or_default()
            .push(doc);
        id
    }

    /// Replace the stored document with the same `_id`. Returns whether one
    /// was found.
    pub fn save(&self, namespace: &str, doc: Document) -> bool {
        let mut namespaces = lock(&self.namespaces);
        let Some(docs) = namespaces.get_mut(namespace) else {
            return false;
        };
        match docs.iter_mut().find(|d| d.get(ID_FIELD) == doc.get(ID_FIELD)) {
            Some(slot) => {
                *slot = doc;
                true
            }
            None => false,
        }
    }

    fn matching(&self, namespace: &str, criteria: &FindCriteria) -> Vec<Document> {
        lock(&self.namespaces)
            .get(namespace)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches_filter(d, &criteria.filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentSource for MemorySource {
    fn count(&self, namespace: &str, criteria: &FindCriteria) -> Result<u64> {
        Ok(self.matching(namespace, criteria).len() as u64)
    }

    fn find(&self, namespace: &str, criteria: &FindCriteria) -> Result<DocumentCursor> {
        let mut docs = self.matching(namespace, criteria);
        if !criteria.sort.is_empty() {
            docs.sort_by(|a, b| compare_by_sort(a, b, &criteria.sort));
        }
        let projection = criteria.projection.clone();
        Ok(Box::new(
            docs.into_iter().map(move |d| Ok(apply_projection(&d, &projection))),
        ))
    }
}
