// Shared fixtures for unit tests

use crate::document::{from_json, Document, FindCriteria};
use crate::error::{PagerError, Result};
use crate::executor::{record_count_message, OutputSink};
use crate::pages::{CollectionResultPages, PagesListener};
use crate::query::{DocumentCursor, DocumentSource, QueryResult};
use crate::sync::lock;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

/// A source serving `total` numbered documents (`{"_id": i, "n": i}`), that
/// counts how many documents were pulled from its cursors and can be told to
/// fail at a given position or to stream fewer documents than it counts.
pub struct NumberedSource {
    total: usize,
    streamed: usize,
    fail_at: Option<usize>,
    count_fails: bool,
    gate: Option<CountGate>,
    pub pulled: Arc<AtomicUsize>,
    pub finds: AtomicUsize,
}

struct CountGate {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

/// Controls a source made with [`NumberedSource::gated`]: `entered` fires
/// when `count()` starts, which then waits for a message on `release`.
pub struct Gate {
    pub entered: mpsc::Receiver<()>,
    pub release: mpsc::Sender<()>,
}

impl NumberedSource {
    pub fn new(total: usize) -> Self {
        NumberedSource {
            total,
            streamed: total,
            fail_at: None,
            count_fails: false,
            gate: None,
            pulled: Arc::new(AtomicUsize::new(0)),
            finds: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Report `total` from count but only stream `streamed` documents.
    pub fn streaming_only(mut self, streamed: usize) -> Self {
        self.streamed = streamed;
        self
    }

    /// Make `count()` fail, as a query the server rejects.
    pub fn failing_count(mut self) -> Self {
        self.count_fails = true;
        self
    }

    /// Make `count()` block until released through the returned [`Gate`].
    pub fn gated(mut self) -> (Self, Gate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.gate = Some(CountGate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let gate = Gate {
            entered: entered_rx,
            release: release_tx,
        };
        (self, gate)
    }

    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

pub fn numbered(i: usize) -> Document {
    from_json(json!({"_id": i, "n": i}))
}

impl DocumentSource for NumberedSource {
    fn count(&self, _namespace: &str, _criteria: &FindCriteria) -> Result<u64> {
        if let Some(gate) = &self.gate {
            lock(&gate.entered).send(()).ok();
            lock(&gate.release).recv().ok();
        }
        if self.count_fails {
            return Err(PagerError::Execution("count refused".into()));
        }
        Ok(self.total as u64)
    }

    fn find(&self, _namespace: &str, _criteria: &FindCriteria) -> Result<DocumentCursor> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let pulled = self.pulled.clone();
        let fail_at = self.fail_at;
        Ok(Box::new((0..self.streamed).map(move |i| {
            pulled.fetch_add(1, Ordering::SeqCst);
            if Some(i) == fail_at {
                Err(PagerError::Execution(format!("cursor died at {i}")))
            } else {
                Ok(numbered(i))
            }
        })))
    }
}

pub fn numbered_result(source: Arc<NumberedSource>) -> QueryResult {
    QueryResult::find(source, "db.numbers", FindCriteria::default())
}

/// One notification received by a [`RecordingListener`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PageChanged { index: usize, ids: Vec<i64> },
    ObjectUpdated { index: usize, old: Document, new: Document },
}

fn ids(page: &[Document]) -> Vec<i64> {
    page.iter().filter_map(|d| d["_id"].as_i64()).collect()
}

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn last(&self) -> Option<Event> {
        lock(&self.events).last().cloned()
    }
}

impl PagesListener for RecordingListener {
    fn page_changed(&self, _pages: &CollectionResultPages, page_index: usize, page: &[Document]) {
        lock(&self.events).push(Event::PageChanged {
            index: page_index,
            ids: ids(page),
        });
    }

    fn page_object_updated(&self, index: usize, old: &Document, new: &Document) {
        lock(&self.events).push(Event::ObjectUpdated {
            index,
            old: old.clone(),
            new: new.clone(),
        });
    }
}

/// Records what an executor reported, one line per message.
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }
}

impl OutputSink for RecordingSink {
    fn report_success(&self, _elapsed: Duration, record_count: usize) {
        lock(&self.lines).push("success".into());
        lock(&self.lines).push(record_count_message(record_count));
    }

    fn report_failure(&self, _elapsed: Duration, message: &str) {
        lock(&self.lines).push("failure".into());
        lock(&self.lines).push(message.to_string());
    }
}
