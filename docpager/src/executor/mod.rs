pub mod pool;

pub use pool::{DisplayQueue, TaskHandle, TaskPool};

use crate::cache::ResultCache;
use crate::error::{unwrap_message, PagerError, Result};
use crate::pages::CollectionResultPages;
use crate::query::QueryResult;
use crate::sync::lock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Receives the cache built by each execution. Every execution, failed or
/// not, ends with exactly one `update_data` call.
pub trait ResultDisplayer: Send + Sync {
    fn update_data(&self, cache: Arc<ResultCache>);
}

impl ResultDisplayer for CollectionResultPages {
    fn update_data(&self, cache: Arc<ResultCache>) {
        if !self.bind(cache) {
            log::debug!("A newer cache was bound before this delivery");
        }
    }
}

/// Where execution messages go.
pub trait OutputSink: Send + Sync {
    fn report_success(&self, elapsed: Duration, record_count: usize);
    fn report_failure(&self, elapsed: Duration, message: &str);
}

/// An [`OutputSink`] writing to the `log` facade under a fixed target.
pub struct LogSink {
    target: String,
}

impl LogSink {
    pub fn new(target: &str) -> Self {
        LogSink {
            target: target.to_string(),
        }
    }
}

impl OutputSink for LogSink {
    fn report_success(&self, elapsed: Duration, record_count: usize) {
        log::info!(target: self.target.as_str(), "{}", success_message(elapsed));
        log::info!(target: self.target.as_str(), "{}", record_count_message(record_count));
    }

    fn report_failure(&self, elapsed: Duration, message: &str) {
        log::error!(target: self.target.as_str(), "{}", failure_message(elapsed));
        log::error!(target: self.target.as_str(), "{message}");
    }
}

/// Elapsed time in seconds with up to three decimals and no trailing zeros:
/// 1200 ms is `"1.2"`, 1000 ms is `"1"`.
pub fn format_seconds(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    let (whole, frac) = (millis / 1000, millis % 1000);
    if frac == 0 {
        return whole.to_string();
    }
    format!("{whole}.{frac:03}").trim_end_matches('0').to_string()
}

pub fn success_message(elapsed: Duration) -> String {
    format!("Executed successfully in {} s", format_seconds(elapsed))
}

pub fn record_count_message(record_count: usize) -> String {
    if record_count == 1 {
        "Showing 1 record that matches the query".to_string()
    } else {
        format!("Showing {record_count} records that match the query")
    }
}

pub fn failure_message(elapsed: Duration) -> String {
    format!("Execution failed in {} s", format_seconds(elapsed))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { record_count: usize },
    Failure { message: String },
}

/// What one execution did, for callers that want more than the sink output.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }
}

/// Runs queries off the interactive thread and hands the resulting cache
/// to the attached displayer. At most one execution is in flight at a time.
pub struct QueryExecutor {
    name: String,
    block_size: usize,
    sink: Arc<dyn OutputSink>,
    displayer: Mutex<Option<Arc<dyn ResultDisplayer>>>,
    cache: Mutex<Arc<ResultCache>>,
    delivering: Mutex<()>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when dropped, including on unwind.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl QueryExecutor {
    pub fn new(name: &str, block_size: usize, sink: Arc<dyn OutputSink>) -> Self {
        QueryExecutor {
            name: name.to_string(),
            block_size: block_size.max(1),
            sink,
            displayer: Mutex::new(None),
            cache: Mutex::new(Arc::new(ResultCache::empty())),
            delivering: Mutex::new(()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The cache of the last completed execution.
    pub fn cache(&self) -> Arc<ResultCache> {
        lock(&self.cache).clone()
    }

    /// Attach (or detach with `None`) the displayer. A new displayer is
    /// handed the current cache right away.
    pub fn set_result_displayer(&self, displayer: Option<Arc<dyn ResultDisplayer>>) {
        *lock(&self.displayer) = displayer;
        self.deliver();
    }

    fn claim(&self) -> Result<()> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| PagerError::QueryInFlight)
    }

    /// Run `produce` on `pool`. Fails with [`PagerError::QueryInFlight`] if
    /// an execution is already running.
    pub fn execute<F>(self: &Arc<Self>, pool: &TaskPool, produce: F) -> Result<TaskHandle<ExecutionReport>>
    where
        F: FnOnce() -> Result<QueryResult> + Send + 'static,
    {
        self.claim()?;
        let executor = self.clone();
        let submitted = pool.submit(move || {
            let _claim = InFlight(&executor.in_flight);
            executor.perform(produce)
        });
        if submitted.is_err() {
            self.in_flight.store(false, Ordering::SeqCst);
        }
        submitted
    }

    /// Run `produce` on the calling thread.
    pub fn run<F>(&self, produce: F) -> Result<ExecutionReport>
    where
        F: FnOnce() -> Result<QueryResult>,
    {
        self.claim()?;
        let _claim = InFlight(&self.in_flight);
        Ok(self.perform(produce))
    }

    fn perform<F>(&self, produce: F) -> ExecutionReport
    where
        F: FnOnce() -> Result<QueryResult>,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        log::debug!("Executing query '{}'", self.name);

        let built = produce().and_then(|result| ResultCache::new(result, self.block_size));
        let elapsed = start.elapsed();

        let (cache, outcome) = match built {
            Ok(cache) => {
                let record_count = cache.size();
                self.sink.report_success(elapsed, record_count);
                (Arc::new(cache), Outcome::Success { record_count })
            }
            Err(e) => {
                let message = unwrap_message(&e);
                self.sink.report_failure(elapsed, &message);
                (Arc::new(ResultCache::empty()), Outcome::Failure { message })
            }
        };

        *lock(&self.cache) = cache;
        self.deliver();

        ExecutionReport {
            started_at,
            elapsed,
            outcome,
        }
    }

    /// Push the current cache to the current displayer. Deliveries are
    /// serialized so a displayer never sees an older cache after a newer one.
    fn deliver(&self) {
        let _delivering = lock(&self.delivering);
        let displayer = lock(&self.displayer).clone();
        if let Some(displayer) = displayer {
            displayer.update_data(self.cache());
        }
    }
}
