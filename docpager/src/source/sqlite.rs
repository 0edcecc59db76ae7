use super::ensure_id;
use crate::document::{apply_projection, matches_filter, Document, FindCriteria, SortOrder};
use crate::error::Result;
use crate::query::{DocumentCursor, DocumentSource};
use crate::sync::lock;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

const DEFAULT_BATCH_SIZE: usize = 256;

/// A document source backed by SQLite. Documents are stored as JSON text,
/// one row per document, keyed by namespace and `_id`.
pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
    batch_size: usize,
}

impl SqliteSource {
    /// Open or create a document database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory document database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                data_json TEXT NOT NULL,
                PRIMARY KEY (namespace, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_namespace ON documents(namespace);
            ",
        )?;
        Ok(SqliteSource {
            conn: Arc::new(Mutex::new(conn)),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Number of rows a cursor fetches per round trip.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Insert or replace a document, assigning an `_id` if it has none.
    /// Returns the document id.
    pub fn save(&self, namespace: &str, mut doc: Document) -> Result<String> {
        let id = ensure_id(&mut doc);
        let data_json = serde_json::to_string(&doc)?;
        lock(&self.conn).execute(
            "INSERT OR REPLACE INTO documents (id, namespace, data_json) VALUES (?1, ?2, ?3)",
            params![id, namespace, data_json],
        )?;
        Ok(id)
    }

    /// Save many documents in one transaction. Either all rows land or none.
    pub fn save_all(&self, namespace: &str, docs: Vec<Document>) -> Result<Vec<String>> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(docs.len());
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO documents (id, namespace, data_json) VALUES (?1, ?2, ?3)",
            )?;
            for mut doc in docs {
                let id = ensure_id(&mut doc);
                let data_json = serde_json::to_string(&doc)?;
                stmt.execute(params![id, namespace, data_json])?;
                ids.push(id);
            }
        }
        tx.commit()?;
        Ok(ids)
    }
}

impl DocumentSource for SqliteSource {
    fn count(&self, namespace: &str, criteria: &FindCriteria) -> Result<u64> {
        let conn = lock(&self.conn);
        if criteria.filter.is_empty() {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )?;
            return Ok(n as u64);
        }

        let mut stmt = conn.prepare("SELECT data_json FROM documents WHERE namespace = ?1")?;
        let rows = stmt.query_map(params![namespace], |row| row.get::<_, String>(0))?;
        let mut count = 0;
        for row in rows {
            let doc: Document = serde_json::from_str(&row?)?;
            if matches_filter(&doc, &criteria.filter) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn find(&self, namespace: &str, criteria: &FindCriteria) -> Result<DocumentCursor> {
        Ok(Box::new(SqliteCursor::new(
            self.conn.clone(),
            namespace,
            criteria,
            self.batch_size,
        )))
    }
}

/// JSON path addressing a (possibly dotted) field for `json_extract`.
fn json_path(field: &str) -> String {
    let mut path = String::from("$");
    for part in field.split('.') {
        path.push_str(&format!(".\"{}\"", part.replace('"', "\\\"")));
    }
    path
}

/// Streams the rows of one find in fixed-size batches. Sorting happens in
/// SQL; filter and projection are applied as rows arrive.
struct SqliteCursor {
    conn: Arc<Mutex<Connection>>,
    sql: String,
    namespace: String,
    sort_paths: Vec<String>,
    criteria: FindCriteria,
    batch_size: usize,
    offset: usize,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl SqliteCursor {
    fn new(
        conn: Arc<Mutex<Connection>>,
        namespace: &str,
        criteria: &FindCriteria,
        batch_size: usize,
    ) -> Self {
        let mut order_by: Vec<String> = criteria
            .sort
            .iter()
            .map(|key| match key.order {
                SortOrder::Ascending => "json_extract(data_json, ?) ASC".to_string(),
                SortOrder::Descending => "json_extract(data_json, ?) DESC".to_string(),
            })
            .collect();
        order_by.push("rowid".to_string());

        SqliteCursor {
            conn,
            sql: format!(
                "SELECT data_json FROM documents WHERE namespace = ? ORDER BY {} LIMIT ? OFFSET ?",
                order_by.join(", ")
            ),
            namespace: namespace.to_string(),
            sort_paths: criteria.sort.iter().map(|k| json_path(&k.field)).collect(),
            criteria: criteria.clone(),
            batch_size,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_batch(&mut self) -> Result<()> {
        let mut values: Vec<SqlValue> = Vec::with_capacity(self.sort_paths.len() + 3);
        values.push(SqlValue::Text(self.namespace.clone()));
        values.extend(self.sort_paths.iter().cloned().map(SqlValue::Text));
        values.push(SqlValue::Integer(self.batch_size as i64));
        values.push(SqlValue::Integer(self.offset as i64));

        let conn = lock(&self.conn);
        let mut stmt = conn.prepare_cached(&self.sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;

        let mut fetched = 0;
        for row in rows {
            fetched += 1;
            let doc: Document = serde_json::from_str(&row?)?;
            if matches_filter(&doc, &self.criteria.filter) {
                self.buffer
                    .push_back(apply_projection(&doc, &self.criteria.projection));
            }
        }

        self.offset += fetched;
        if fetched < self.batch_size {
            self.exhausted = true;
        }
        log::debug!(
            "Fetched {fetched} rows from {} (offset now {})",
            self.namespace,
            self.offset
        );
        Ok(())
    }
}

impl Iterator for SqliteCursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return Some(Ok(doc));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch_batch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}
