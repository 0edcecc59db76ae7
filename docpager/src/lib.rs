pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod executor;
pub mod pages;
pub mod panel;
pub mod query;
pub mod source;
pub mod views;

mod sync;

#[cfg(test)]
mod testing;

pub use cache::ResultCache;
pub use config::{PagerConfig, PreferenceStore, Preferences};
pub use document::{Document, FindCriteria, SortKey, SortOrder};
pub use error::{PagerError, Result};
pub use executor::{OutputSink, QueryExecutor, ResultDisplayer, TaskPool};
pub use pages::{CollectionResultPages, PagesListener};
pub use panel::{PaginationStatus, PanelContext, ResultPanel};
pub use query::{DocumentSource, QueryResult};
pub use source::{MemorySource, SqliteSource};
pub use views::{ResultView, ViewKind};
