use crate::error::{PagerError, Result};
use crate::sync::lock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// A bounded set of blocking workers on a private tokio runtime, running
/// submitted tasks in FIFO order. Query execution and page loads run here so
/// the interactive thread never blocks on the database.
pub struct TaskPool {
    name: String,
    threads: usize,
    runtime: Runtime,
}

impl TaskPool {
    /// Start a pool of at most `threads` workers (at least one), named
    /// `{name}-{n}`.
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let prefix = name.to_string();
        let next = AtomicUsize::new(0);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name_fn(move || format!("{prefix}-{}", next.fetch_add(1, Ordering::Relaxed)))
            .build()?;

        Ok(TaskPool {
            name: name.to_string(),
            threads,
            runtime,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queue `task` and return a handle to its outcome. A panicking task is
    /// logged and its handle reports [`PagerError::TaskAborted`].
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let join = self.runtime.spawn_blocking(task);
        Ok(TaskHandle {
            pool: self.name.clone(),
            runtime: self.runtime.handle().clone(),
            join: Some(join),
        })
    }
}

/// The pending outcome of a submitted task. Dropping it does not cancel
/// the task.
pub struct TaskHandle<T> {
    pool: String,
    runtime: Handle,
    join: Option<JoinHandle<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task has run.
    pub fn wait(mut self) -> Result<T> {
        let join = self.join.take().ok_or(PagerError::TaskAborted)?;
        self.finish(join)
    }

    /// The outcome if the task already finished. `Err` once the task is
    /// known to have been aborted.
    pub fn try_take(&mut self) -> Result<Option<T>> {
        match self.join.take() {
            Some(join) if join.is_finished() => self.finish(join).map(Some),
            Some(join) => {
                self.join = Some(join);
                Ok(None)
            }
            None => Err(PagerError::TaskAborted),
        }
    }

    fn finish(&self, join: JoinHandle<T>) -> Result<T> {
        self.runtime.block_on(join).map_err(|e| {
            if e.is_panic() {
                log::error!("Task on pool '{}' panicked", self.pool);
            } else {
                log::warn!("Task on pool '{}' was cancelled", self.pool);
            }
            PagerError::TaskAborted
        })
    }
}

type Action = Box<dyn FnOnce() + Send + 'static>;

/// The interactive thread's queue. Any thread may `post` an action; the
/// interactive thread runs them in order when it calls `run_pending`.
pub struct DisplayQueue {
    tx: Mutex<mpsc::Sender<Action>>,
    rx: Mutex<mpsc::Receiver<Action>>,
}

impl DisplayQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        DisplayQueue {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
        }
    }

    pub fn post<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Both ends live in self, so the channel cannot be closed here
        let _ = lock(&self.tx).send(Box::new(action));
    }

    /// Run every queued action on the calling thread. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let actions: Vec<Action> = lock(&self.rx).try_iter().collect();
        let count = actions.len();
        for action in actions {
            action();
        }
        count
    }
}

impl Default for DisplayQueue {
    fn default() -> Self {
        Self::new()
    }
}
