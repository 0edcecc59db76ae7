use crate::document::{Document, FindCriteria, SortKey};
use crate::error::Result;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A lazy, forward-only sequence of documents produced by a find.
pub type DocumentCursor = Box<dyn Iterator<Item = Result<Document>> + Send>;

/// The database driver seen from the pager: it can count and stream the
/// documents of a namespace matching some criteria.
pub trait DocumentSource: Send + Sync {
    /// Number of documents matching the criteria.
    fn count(&self, namespace: &str, criteria: &FindCriteria) -> Result<u64>;

    /// Open a cursor over the matching documents, with projection and sort
    /// already applied.
    fn find(&self, namespace: &str, criteria: &FindCriteria) -> Result<DocumentCursor>;
}

/// Handle to the outcome of one query execution: the criteria that produced
/// it and the source able to stream its documents.
///
/// Two results are equal when they describe the same query (namespace,
/// filter, projection, sort), whatever source they stream from. Views bound
/// to equal results are kept in sync when a document is edited.
#[derive(Clone)]
pub struct QueryResult {
    inner: Option<Bound>,
}

#[derive(Clone)]
struct Bound {
    namespace: String,
    criteria: FindCriteria,
    source: Arc<dyn DocumentSource>,
}

impl QueryResult {
    /// A find over `namespace` with `criteria`, executed against `source`.
    pub fn find(
        source: Arc<dyn DocumentSource>,
        namespace: &str,
        criteria: FindCriteria,
    ) -> Self {
        QueryResult {
            inner: Some(Bound {
                namespace: namespace.to_string(),
                criteria,
                source,
            }),
        }
    }

    /// The "no result yet" value.
    pub fn empty() -> Self {
        QueryResult { inner: None }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.inner.as_ref().map(|b| b.namespace.as_str())
    }

    pub fn criteria(&self) -> Option<&FindCriteria> {
        self.inner.as_ref().map(|b| &b.criteria)
    }

    /// The projection of the originating query, empty when there is none.
    pub fn projection(&self) -> Option<&Document> {
        self.criteria().map(|c| &c.projection)
    }

    /// Count the documents this query matches. Done once per cache.
    pub fn count(&self) -> Result<u64> {
        match &self.inner {
            Some(b) => b.source.count(&b.namespace, &b.criteria),
            None => Ok(0),
        }
    }

    /// Re-run the query and return a fresh cursor.
    pub fn open_cursor(&self) -> Result<DocumentCursor> {
        match &self.inner {
            Some(b) => b.source.find(&b.namespace, &b.criteria),
            None => Ok(Box::new(std::iter::empty())),
        }
    }
}

impl PartialEq for QueryResult {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) => a.namespace == b.namespace && a.criteria == b.criteria,
            _ => false,
        }
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(b) => f
                .debug_struct("QueryResult")
                .field("namespace", &b.namespace)
                .field("criteria", &b.criteria)
                .finish(),
            None => f.write_str("QueryResult::Empty"),
        }
    }
}

/// What an export of a query result needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportProperties {
    pub namespace: String,
    pub filter: Document,
    pub projection: Document,
    pub sort: Vec<SortKey>,
    pub json_array: bool,
    pub file: PathBuf,
    pub encoding: String,
}

impl ExportProperties {
    /// Export settings for the documents of `result`. Returns `None` for the
    /// empty result, which has nothing to export.
    pub fn for_result(
        result: &QueryResult,
        file: PathBuf,
        json_array: bool,
        encoding: &str,
    ) -> Option<Self> {
        let bound = result.inner.as_ref()?;
        Some(ExportProperties {
            namespace: bound.namespace.clone(),
            filter: bound.criteria.filter.clone(),
            projection: bound.criteria.projection.clone(),
            sort: bound.criteria.sort.clone(),
            json_array,
            file,
            encoding: encoding.to_string(),
        })
    }
}
