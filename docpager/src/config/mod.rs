use crate::error::{PagerError, Result};
use crate::sync::lock;
use crate::views::ViewKind;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Static settings for a pager session, read from YAML.
///
/// ```yaml
/// block_size: 100
/// page_size: 20
/// worker_threads: 2
/// output_name: query
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerConfig {
    /// Documents pulled from the cursor per cache load.
    pub block_size: usize,
    /// Initial page size when no preference is stored.
    pub page_size: usize,
    pub worker_threads: usize,
    /// Name of the executor output channel.
    pub output_name: String,
}

impl Default for PagerConfig {
    fn default() -> Self {
        PagerConfig {
            block_size: 100,
            page_size: 20,
            worker_threads: 2,
            output_name: "query".to_string(),
        }
    }
}

impl PagerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: PagerConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("block_size", self.block_size),
            ("page_size", self.page_size),
            ("worker_threads", self.worker_threads),
        ] {
            if value == 0 {
                return Err(PagerError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.output_name.trim().is_empty() {
            return Err(PagerError::Config("output_name must not be empty".into()));
        }
        Ok(())
    }
}

/// Check a user-entered page size.
pub fn parse_page_size(input: &str) -> Result<usize> {
    match input.trim().parse::<i64>() {
        Ok(n) if n >= 1 => Ok(n as usize),
        Ok(n) => Err(PagerError::InvalidPageSize(format!(
            "{n} is not a positive number"
        ))),
        Err(_) => Err(PagerError::InvalidPageSize(format!(
            "'{}' is not a number",
            input.trim()
        ))),
    }
}

/// Key-value persistence for [`Preferences`].
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Preferences kept in a `preferences` table of a SQLite database.
pub struct SqlitePreferenceStore {
    conn: Mutex<Connection>,
}

impl SqlitePreferenceStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(SqlitePreferenceStore {
            conn: Mutex::new(conn),
        })
    }
}

impl PreferenceStore for SqlitePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = lock(&self.conn)
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.conn).execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

pub const PAGE_SIZE_KEY: &str = "page_size";
pub const RESULT_VIEW_KEY: &str = "result_view";
pub const SORT_FIELDS_KEY: &str = "sort_fields";
pub const SHOW_EDIT_HINT_KEY: &str = "show_edit_hint";

/// Per-panel display preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub page_size: usize,
    pub result_view: ViewKind,
    pub sort_fields: bool,
    pub show_edit_hint: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            page_size: 20,
            result_view: ViewKind::TreeTable,
            sort_fields: false,
            show_edit_hint: true,
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    value
        .parse()
        .map_err(|_| PagerError::Config(format!("{key}: expected true or false, got '{value}'")))
}

impl Preferences {
    /// Defaults seeded from the configured page size.
    pub fn from_config(config: &PagerConfig) -> Self {
        Preferences {
            page_size: config.page_size,
            ..Self::default()
        }
    }

    /// Read stored preferences over `self`. Missing keys keep their current
    /// value; malformed ones are a [`PagerError::Config`].
    pub fn load_over(mut self, store: &dyn PreferenceStore) -> Result<Self> {
        if let Some(value) = store.get(PAGE_SIZE_KEY)? {
            self.page_size = parse_page_size(&value)
                .map_err(|e| PagerError::Config(format!("{PAGE_SIZE_KEY}: {e}")))?;
        }
        if let Some(value) = store.get(RESULT_VIEW_KEY)? {
            self.result_view = value.parse()?;
        }
        if let Some(value) = store.get(SORT_FIELDS_KEY)? {
            self.sort_fields = parse_flag(SORT_FIELDS_KEY, &value)?;
        }
        if let Some(value) = store.get(SHOW_EDIT_HINT_KEY)? {
            self.show_edit_hint = parse_flag(SHOW_EDIT_HINT_KEY, &value)?;
        }
        Ok(self)
    }

    pub fn load(store: &dyn PreferenceStore) -> Result<Self> {
        Self::default().load_over(store)
    }

    pub fn save(&self, store: &dyn PreferenceStore) -> Result<()> {
        store.set(PAGE_SIZE_KEY, &self.page_size.to_string())?;
        store.set(RESULT_VIEW_KEY, self.result_view.as_str())?;
        store.set(SORT_FIELDS_KEY, &self.sort_fields.to_string())?;
        store.set(SHOW_EDIT_HINT_KEY, &self.show_edit_hint.to_string())?;
        Ok(())
    }

    /// Set one preference from its stored string form.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            PAGE_SIZE_KEY => self.page_size = parse_page_size(value)?,
            RESULT_VIEW_KEY => self.result_view = value.parse()?,
            SORT_FIELDS_KEY => self.sort_fields = parse_flag(key, value)?,
            SHOW_EDIT_HINT_KEY => self.show_edit_hint = parse_flag(key, value)?,
            other => return Err(PagerError::Config(format!("unknown preference '{other}'"))),
        }
        Ok(())
    }
}
