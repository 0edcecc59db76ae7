use crate::document::{self, Document};
use crate::error::{PagerError, Result};
use crate::pages::{CollectionResultPages, ListenerId, PagesListener};
use crate::sync::lock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// The presentations a result panel can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    #[default]
    TreeTable,
    FlatTable,
    Text,
}

impl ViewKind {
    pub const ALL: [ViewKind; 3] = [ViewKind::TreeTable, ViewKind::FlatTable, ViewKind::Text];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::TreeTable => "tree_table",
            ViewKind::FlatTable => "flat_table",
            ViewKind::Text => "text",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewKind {
    type Err = PagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tree_table" | "tree" => Ok(ViewKind::TreeTable),
            "flat_table" | "table" => Ok(ViewKind::FlatTable),
            "text" => Ok(ViewKind::Text),
            other => Err(PagerError::Config(format!("unknown result view '{other}'"))),
        }
    }
}

/// Anything that presents the current page of a [`CollectionResultPages`].
pub trait ResultView: Send + Sync {
    fn kind(&self) -> ViewKind;

    fn pages(&self) -> &Arc<CollectionResultPages>;

    /// The rows currently shown.
    fn rows(&self) -> Vec<Document>;
}

/// Keeps the last announced page, patched in place on object updates.
struct RowsListener {
    rows: Mutex<Vec<Document>>,
}

impl PagesListener for RowsListener {
    fn page_changed(&self, _pages: &CollectionResultPages, _page_index: usize, page: &[Document]) {
        *lock(&self.rows) = page.to_vec();
    }

    fn page_object_updated(&self, index: usize, _old: &Document, new: &Document) {
        if let Some(row) = lock(&self.rows).get_mut(index) {
            *row = new.clone();
        }
    }
}

/// A view that mirrors its window's visible page and renders it as text
/// in the shape of its [`ViewKind`].
pub struct SnapshotView {
    kind: ViewKind,
    pages: Arc<CollectionResultPages>,
    listener: Arc<RowsListener>,
    listener_id: ListenerId,
    sort_fields: AtomicBool,
}

impl SnapshotView {
    pub fn new(kind: ViewKind, pages: Arc<CollectionResultPages>) -> Self {
        let listener = Arc::new(RowsListener {
            rows: Mutex::new(Vec::new()),
        });
        let listener_id = pages.add_listener(listener.clone());
        SnapshotView {
            kind,
            pages,
            listener,
            listener_id,
            sort_fields: AtomicBool::new(false),
        }
    }

    /// Show document fields in alphabetical order, recursively.
    pub fn set_sort_fields(&self, sort_fields: bool) {
        self.sort_fields.store(sort_fields, Ordering::SeqCst);
    }

    pub fn sort_fields(&self) -> bool {
        self.sort_fields.load(Ordering::SeqCst)
    }

    /// Render the visible rows.
    pub fn render(&self) -> String {
        let rows = self.rows();
        match self.kind {
            ViewKind::Text => render_text(&rows),
            ViewKind::FlatTable => render_flat(&rows),
            ViewKind::TreeTable => render_tree(&rows),
        }
    }
}

impl ResultView for SnapshotView {
    fn kind(&self) -> ViewKind {
        self.kind
    }

    fn pages(&self) -> &Arc<CollectionResultPages> {
        &self.pages
    }

    fn rows(&self) -> Vec<Document> {
        let rows = lock(&self.listener.rows).clone();
        if self.sort_fields() {
            rows.iter().map(document::sort_fields).collect()
        } else {
            rows
        }
    }
}

impl Drop for SnapshotView {
    fn drop(&mut self) {
        self.pages.remove_listener(self.listener_id);
    }
}

fn render_text(rows: &[Document]) -> String {
    rows.iter()
        .map(|doc| serde_json::to_string_pretty(doc).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n")
}

fn scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tab separated, one column per top-level field in order of first
/// appearance.
fn render_flat(rows: &[Document]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for doc in rows {
        for key in doc.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }
    let mut lines = vec![columns.join("\t")];
    for doc in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| doc.get(*c).map(scalar).unwrap_or_default())
            .collect();
        lines.push(cells.join("\t"));
    }
    lines.join("\n")
}

fn render_tree(rows: &[Document]) -> String {
    let mut out = String::new();
    for doc in rows {
        let label = doc
            .get(document::ID_FIELD)
            .map(scalar)
            .unwrap_or_else(|| "(no id)".to_string());
        out.push_str(&label);
        out.push('\n');
        tree_fields(doc, 1, &mut out);
    }
    out
}

fn tree_fields(doc: &Document, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for (key, value) in doc {
        match value {
            serde_json::Value::Object(nested) => {
                out.push_str(&format!("{indent}{key}\n"));
                tree_fields(nested, depth + 1, out);
            }
            other => out.push_str(&format!("{indent}{key}: {}\n", scalar(other))),
        }
    }
}
