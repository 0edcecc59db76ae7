use crate::document::Document;
use crate::error::{unwrap_message, PagerError, Result};
use crate::query::{DocumentCursor, QueryResult};
use crate::sync::lock;
use std::ops::Range;
use std::sync::Mutex;

/// Append-only materialization of a query result.
///
/// Documents are pulled from a single forward-only cursor in blocks of
/// `block_size` and never unloaded. All loads and edits go through one mutex,
/// so at most one thread advances the cursor at a time and block `b + 1` is
/// never loaded before block `b`.
pub struct ResultCache {
    query: QueryResult,
    total: usize,
    block_size: usize,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    docs: Vec<Document>,
    cursor: Option<DocumentCursor>,
    state: LoadState,
}

enum LoadState {
    Open,
    /// The cursor ended before `total` documents were seen.
    Exhausted,
    /// The cursor failed while loading entry `index`. Sticky.
    Failed { index: usize, message: String },
}

impl ResultCache {
    /// Execute the query: count its documents and open its cursor. Nothing is
    /// loaded until the first [`ResultCache::ensure_loaded`].
    pub fn new(query: QueryResult, block_size: usize) -> Result<Self> {
        let total = query.count()? as usize;
        let cursor = query.open_cursor()?;
        Ok(ResultCache {
            query,
            total,
            block_size: block_size.max(1),
            inner: Mutex::new(CacheInner {
                docs: Vec::new(),
                cursor: Some(cursor),
                state: LoadState::Open,
            }),
        })
    }

    /// The "no result yet" cache: zero documents, fully loaded.
    pub fn empty() -> Self {
        ResultCache {
            query: QueryResult::empty(),
            total: 0,
            block_size: 1,
            inner: Mutex::new(CacheInner {
                docs: Vec::new(),
                cursor: None,
                state: LoadState::Exhausted,
            }),
        }
    }

    pub fn query_result(&self) -> &QueryResult {
        &self.query
    }

    /// Total number of documents as counted when the query was executed.
    pub fn size(&self) -> usize {
        self.total
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of documents materialized so far.
    pub fn loaded_len(&self) -> usize {
        lock(&self.inner).docs.len()
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        index < self.loaded_len()
    }

    /// The sticky load failure, if the cursor has failed.
    pub fn load_error(&self) -> Option<PagerError> {
        match &lock(&self.inner).state {
            LoadState::Failed { index, message } => Some(PagerError::LoadFailed {
                index: *index,
                message: message.clone(),
            }),
            _ => None,
        }
    }

    /// Make sure the block holding `index` is materialized, loading every
    /// earlier block first. Indexes at or past [`ResultCache::size`] are a
    /// no-op, as is a cursor ending early (the remainder simply stays
    /// unloaded). A cursor error is returned once it happens and on every
    /// later call that needs data past the failure point.
    pub fn ensure_loaded(&self, index: usize) -> Result<()> {
        if index >= self.total {
            return Ok(());
        }
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        if index < inner.docs.len() {
            return Ok(());
        }
        match &inner.state {
            LoadState::Open => {}
            LoadState::Exhausted => return Ok(()),
            LoadState::Failed { index, message } => {
                return Err(PagerError::LoadFailed {
                    index: *index,
                    message: message.clone(),
                })
            }
        }

        let block = index / self.block_size;
        let target = ((block + 1) * self.block_size).min(self.total);
        let before = inner.docs.len();
        while inner.docs.len() < target {
            let next = inner.cursor.as_mut().and_then(|cursor| cursor.next());
            match next {
                Some(Ok(doc)) => inner.docs.push(doc),
                Some(Err(e)) => {
                    let failed_at = inner.docs.len();
                    let message = unwrap_message(&e);
                    log::warn!("Result cursor failed at entry {failed_at}: {message}");
                    inner.cursor = None;
                    inner.state = LoadState::Failed {
                        index: failed_at,
                        message: message.clone(),
                    };
                    return Err(PagerError::LoadFailed {
                        index: failed_at,
                        message,
                    });
                }
                None => {
                    log::debug!(
                        "Result cursor ended after {} of {} counted documents",
                        inner.docs.len(),
                        self.total
                    );
                    inner.cursor = None;
                    inner.state = LoadState::Exhausted;
                    break;
                }
            }
        }
        log::debug!(
            "Loaded {} documents up to block {block} ({} of {})",
            inner.docs.len() - before,
            inner.docs.len(),
            self.total
        );
        Ok(())
    }

    /// The document at `index`, or `None` if it is not loaded.
    pub fn get(&self, index: usize) -> Option<Document> {
        lock(&self.inner).docs.get(index).cloned()
    }

    /// The loaded documents within `range`. Entries that are not loaded are
    /// left out, so the result may be shorter than the range.
    pub fn slice(&self, range: Range<usize>) -> Vec<Document> {
        let inner = lock(&self.inner);
        let end = range.end.min(inner.docs.len());
        let start = range.start.min(end);
        inner.docs[start..end].to_vec()
    }

    /// Replace the loaded document equal to `previous` with `updated`, in
    /// place. Returns the index of the replaced entry, or `None` when no
    /// loaded document equals `previous`.
    pub fn edit_object(&self, previous: &Document, updated: &Document) -> Option<usize> {
        let mut inner = lock(&self.inner);
        let index = inner.docs.iter().position(|d| d == previous)?;
        inner.docs[index] = updated.clone();
        Some(index)
    }

    /// Index of the loaded document equal to `doc`.
    pub fn position_of(&self, doc: &Document) -> Option<usize> {
        lock(&self.inner).docs.iter().position(|d| d == doc)
    }
}
