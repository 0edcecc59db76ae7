use thiserror::Error;

#[derive(Error, Debug)]
pub enum PagerError {
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Edit conflict: the previous document is not in the loaded result")]
    EditConflict,

    #[error("Invalid page size: {0}")]
    InvalidPageSize(String),

    #[error("Loading result entry {index} failed: {message}")]
    LoadFailed { index: usize, message: String },

    #[error("The result is read-only")]
    ReadOnly,

    #[error("A query execution is already pending on this executor")]
    QueryInFlight,

    #[error("Background task was aborted")]
    TaskAborted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, PagerError>;

/// Returns the message of the innermost error in `err`'s source chain.
///
/// Wrapper errors ("Execution error: ...", driver envelopes) add nothing for
/// the person reading the output, so the root cause is what gets reported.
pub fn unwrap_message(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    match current.downcast_ref::<PagerError>() {
        Some(PagerError::Execution(message)) => message.clone(),
        _ => current.to_string(),
    }
}
