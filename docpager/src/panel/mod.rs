use crate::cache::ResultCache;
use crate::config::{parse_page_size, PagerConfig, PreferenceStore, Preferences};
use crate::document::{strip_excluded_fields, Document};
use crate::error::{PagerError, Result};
use crate::executor::{
    DisplayQueue, ExecutionReport, OutputSink, QueryExecutor, ResultDisplayer, TaskHandle,
    TaskPool,
};
use crate::pages::{CollectionResultPages, ListenerId, PagesListener};
use crate::query::{ExportProperties, QueryResult};
use crate::sync::lock;
use crate::views::{ResultView, SnapshotView, ViewKind};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const EDIT_HINT: &str = "Double-click a document to edit it";

/// What the pagination controls show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationStatus {
    pub total: usize,
    /// 1-based, 0 when there is nothing to show.
    pub page_number: usize,
    pub page_count: usize,
    pub can_move_backward: bool,
    pub can_move_forward: bool,
}

impl PaginationStatus {
    pub fn of(pages: &CollectionResultPages) -> Self {
        let total = pages.total_elements_count();
        PaginationStatus {
            total,
            page_number: if total == 0 { 0 } else { pages.page_index() + 1 },
            page_count: pages.page_count(),
            can_move_backward: pages.can_move_backward(),
            can_move_forward: pages.can_move_forward(),
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{}/{} ({} documents)",
            self.page_number, self.page_count, self.total
        )
    }
}

/// Follows the active view and publishes its status on the display queue.
struct StatusListener {
    display: Arc<DisplayQueue>,
    shown: Arc<Mutex<PaginationStatus>>,
}

impl StatusListener {
    fn publish(&self, status: PaginationStatus) {
        let shown = self.shown.clone();
        self.display.post(move || *lock(&shown) = status);
    }
}

impl PagesListener for StatusListener {
    fn page_changed(&self, pages: &CollectionResultPages, _page_index: usize, _page: &[Document]) {
        self.publish(PaginationStatus::of(pages));
    }

    fn page_object_updated(&self, _index: usize, _old: &Document, _new: &Document) {}
}

/// Binds every view of a panel to one shared cache. A different query
/// starts every view on its first page; a re-execution keeps their pages.
struct ViewsDisplayer {
    views: Vec<Arc<SnapshotView>>,
    current: Arc<Mutex<QueryResult>>,
}

impl ResultDisplayer for ViewsDisplayer {
    fn update_data(&self, cache: Arc<ResultCache>) {
        let result = cache.query_result();
        // A failed execution delivers the empty cache; the panel keeps its
        // query so it can be run again.
        let new_query = {
            let mut current = lock(&self.current);
            let new_query = !result.is_empty() && *current != *result;
            if !result.is_empty() {
                *current = result.clone();
            }
            new_query
        };
        for view in &self.views {
            let installed = if new_query {
                view.pages().bind_from_start(cache.clone())
            } else {
                view.pages().bind(cache.clone())
            };
            if !installed {
                log::debug!("The {} view was rebound meanwhile", view.kind());
            }
        }
    }
}

struct Busy(Arc<AtomicUsize>);

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The shared services a panel runs on.
#[derive(Clone)]
pub struct PanelContext {
    pub pool: Arc<TaskPool>,
    pub display: Arc<DisplayQueue>,
    pub sink: Arc<dyn OutputSink>,
    pub store: Arc<dyn PreferenceStore>,
}

/// One query result shown through a tree, a flat table and a text view.
///
/// Navigation and query work is dispatched to the task pool and reported
/// back through the returned handles. Status for the pagination controls is
/// posted to the display queue.
pub struct ResultPanel {
    views: Vec<Arc<SnapshotView>>,
    active: Mutex<ViewKind>,
    displayer: Arc<ViewsDisplayer>,
    current: Arc<Mutex<QueryResult>>,
    status: Arc<StatusListener>,
    status_id: Mutex<ListenerId>,
    shown_status: Arc<Mutex<PaginationStatus>>,
    preferences: Mutex<Preferences>,
    executor: Arc<QueryExecutor>,
    context: PanelContext,
    busy: Arc<AtomicUsize>,
    read_only: bool,
}

impl ResultPanel {
    pub fn new(
        config: &PagerConfig,
        preferences: Preferences,
        context: PanelContext,
        read_only: bool,
    ) -> Self {
        let views: Vec<Arc<SnapshotView>> = ViewKind::ALL
            .iter()
            .map(|kind| {
                let pages = Arc::new(CollectionResultPages::empty(
                    preferences.page_size,
                    config.block_size,
                    read_only,
                ));
                let view = SnapshotView::new(*kind, pages);
                view.set_sort_fields(preferences.sort_fields);
                Arc::new(view)
            })
            .collect();

        let current = Arc::new(Mutex::new(QueryResult::empty()));
        let displayer = Arc::new(ViewsDisplayer {
            views: views.clone(),
            current: current.clone(),
        });
        let executor = Arc::new(QueryExecutor::new(
            &config.output_name,
            config.block_size,
            context.sink.clone(),
        ));
        executor.set_result_displayer(Some(displayer.clone()));

        let active = preferences.result_view;
        let active_pages = views[view_slot(active)].pages().clone();
        let shown_status = Arc::new(Mutex::new(PaginationStatus::of(&active_pages)));
        let status = Arc::new(StatusListener {
            display: context.display.clone(),
            shown: shown_status.clone(),
        });
        let status_id = active_pages.add_listener(status.clone());

        ResultPanel {
            views,
            active: Mutex::new(active),
            displayer,
            current,
            status,
            status_id: Mutex::new(status_id),
            shown_status,
            preferences: Mutex::new(preferences),
            executor,
            context,
            busy: Arc::new(AtomicUsize::new(0)),
            read_only,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn view(&self, kind: ViewKind) -> Arc<SnapshotView> {
        self.views[view_slot(kind)].clone()
    }

    pub fn active_kind(&self) -> ViewKind {
        *lock(&self.active)
    }

    pub fn active_view(&self) -> Arc<SnapshotView> {
        self.view(self.active_kind())
    }

    fn active_pages(&self) -> Arc<CollectionResultPages> {
        self.active_view().pages().clone()
    }

    pub fn current_result(&self) -> QueryResult {
        lock(&self.current).clone()
    }

    pub fn preferences(&self) -> Preferences {
        lock(&self.preferences).clone()
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    /// Whether work started from this panel is still running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst) > 0 || self.executor.is_running()
    }

    fn dispatch<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.busy.fetch_add(1, Ordering::SeqCst);
        let busy = Busy(self.busy.clone());
        self.context.pool.submit(move || {
            let _busy = busy;
            task()
        })
    }

    /// Execute `result` on the pool and show it in every view through one
    /// shared cache, starting at the first page. The outcome goes to the
    /// output sink; a failure empties the views. Fails with
    /// [`PagerError::QueryInFlight`] while another execution runs.
    pub fn set_result(&self, result: QueryResult) -> Result<TaskHandle<ExecutionReport>> {
        self.executor
            .execute(&self.context.pool, move || Ok(result))
    }

    /// Re-execute the current query and show the new result in every view,
    /// each staying on its page when it still exists.
    pub fn refresh_results(&self) -> Result<TaskHandle<ExecutionReport>> {
        let current = self.current_result();
        self.executor
            .execute(&self.context.pool, move || Ok(current))
    }

    /// Show an already executed cache in every view.
    pub fn bind_cache(&self, cache: Arc<ResultCache>) {
        self.displayer.update_data(cache);
    }

    pub fn move_first(&self) -> Result<TaskHandle<()>> {
        let pages = self.active_pages();
        self.dispatch(move || pages.move_first())
    }

    pub fn move_previous(&self) -> Result<TaskHandle<()>> {
        let pages = self.active_pages();
        self.dispatch(move || pages.move_previous())
    }

    pub fn move_next(&self) -> Result<TaskHandle<()>> {
        let pages = self.active_pages();
        self.dispatch(move || pages.move_next())
    }

    pub fn move_last(&self) -> Result<TaskHandle<()>> {
        let pages = self.active_pages();
        self.dispatch(move || pages.move_last())
    }

    /// Make `kind` the active view. The status listener follows it, and if
    /// it shows a different result than the panel's, it is rebound to the
    /// cache already holding the panel's result in the background. The
    /// returned handle tracks that rebind.
    pub fn change_result_view(&self, kind: ViewKind) -> Result<Option<TaskHandle<()>>> {
        let previous = std::mem::replace(&mut *lock(&self.active), kind);
        let pages = self.view(kind).pages().clone();
        if previous != kind {
            let old_pages = self.view(previous).pages().clone();
            let mut status_id = lock(&self.status_id);
            old_pages.remove_listener(*status_id);
            *status_id = pages.add_listener(self.status.clone());
        }
        self.status.publish(PaginationStatus::of(&pages));
        self.update_preferences(|prefs| prefs.result_view = kind)?;

        let current = self.current_result();
        if pages.query_result() == current {
            return Ok(None);
        }
        let Some(cache) = self.shared_cache(&current) else {
            log::warn!("No cache holds the current result; the {kind} view keeps its own");
            return Ok(None);
        };
        log::debug!("Rebinding {kind} view to the shared cache");
        self.dispatch(move || {
            pages.bind(cache);
        })
        .map(Some)
    }

    /// The cache some view or the last execution holds for `result`.
    fn shared_cache(&self, result: &QueryResult) -> Option<Arc<ResultCache>> {
        self.views
            .iter()
            .map(|view| view.pages().cache())
            .chain(std::iter::once(self.executor.cache()))
            .find(|cache| cache.query_result() == result)
    }

    /// Apply a user-entered page size to every view and remember it.
    pub fn change_page_size(&self, input: &str) -> Result<TaskHandle<()>> {
        let page_size = parse_page_size(input)?;
        self.update_preferences(|prefs| prefs.page_size = page_size)?;
        let all: Vec<Arc<CollectionResultPages>> =
            self.views.iter().map(|v| v.pages().clone()).collect();
        self.dispatch(move || {
            for pages in all {
                pages.set_page_size(page_size);
            }
        })
    }

    pub fn set_sort_fields(&self, sort_fields: bool) -> Result<()> {
        for view in &self.views {
            view.set_sort_fields(sort_fields);
        }
        self.update_preferences(|prefs| prefs.sort_fields = sort_fields)
    }

    fn update_preferences(&self, change: impl FnOnce(&mut Preferences)) -> Result<()> {
        let mut prefs = lock(&self.preferences);
        change(&mut prefs);
        prefs.save(self.context.store.as_ref())
    }

    /// Propagate an edit of `previous` to every view showing the current
    /// result. Fields hidden by the result's projection are dropped from
    /// `updated` first; the document actually propagated is returned.
    pub fn edit_document(&self, previous: &Document, updated: Document) -> Result<Document> {
        if self.read_only {
            return Err(PagerError::ReadOnly);
        }
        let current = self.current_result();
        let mut updated = updated;
        if let Some(projection) = current.projection() {
            strip_excluded_fields(&mut updated, projection);
        }

        // Caches already edited, with the index of the replaced entry
        let mut edited: Vec<(Arc<ResultCache>, usize)> = Vec::new();
        for view in &self.views {
            let pages = view.pages();
            let cache = pages.cache();
            if *cache.query_result() != current {
                continue;
            }
            if let Some((_, index)) = edited.iter().find(|(c, _)| Arc::ptr_eq(c, &cache)) {
                pages.announce_update(&cache, *index, previous, &updated);
                continue;
            }
            match cache.edit_object(previous, &updated) {
                Some(index) => {
                    pages.announce_update(&cache, index, previous, &updated);
                    edited.push((cache, index));
                }
                None => log::warn!("The {} view did not take the edit", view.kind()),
            }
        }
        if edited.is_empty() {
            return Err(PagerError::EditConflict);
        }
        Ok(updated)
    }

    /// Status of the active view right now.
    pub fn pagination_status(&self) -> PaginationStatus {
        PaginationStatus::of(&self.active_pages())
    }

    /// Status as last published to the display queue.
    pub fn displayed_status(&self) -> PaginationStatus {
        lock(&self.shown_status).clone()
    }

    pub fn document_edit_hint(&self) -> Option<&'static str> {
        if !self.read_only && lock(&self.preferences).show_edit_hint {
            Some(EDIT_HINT)
        } else {
            None
        }
    }

    pub fn dismiss_edit_hint(&self) -> Result<()> {
        self.update_preferences(|prefs| prefs.show_edit_hint = false)
    }

    pub fn export_properties(
        &self,
        file: PathBuf,
        json_array: bool,
        encoding: &str,
    ) -> Option<ExportProperties> {
        ExportProperties::for_result(&self.current_result(), file, json_array, encoding)
    }
}

impl ResultDisplayer for ResultPanel {
    fn update_data(&self, cache: Arc<ResultCache>) {
        self.bind_cache(cache);
    }
}

fn view_slot(kind: ViewKind) -> usize {
    match kind {
        ViewKind::TreeTable => 0,
        ViewKind::FlatTable => 1,
        ViewKind::Text => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryPreferenceStore, PAGE_SIZE_KEY, RESULT_VIEW_KEY, SHOW_EDIT_HINT_KEY};
    use crate::document::{from_json, FindCriteria};
    use crate::executor::Outcome;
    use crate::source::MemorySource;
    use crate::testing::{numbered, numbered_result, NumberedSource, RecordingSink};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::mpsc;

    struct Fixture {
        panel: ResultPanel,
        store: Arc<MemoryPreferenceStore>,
        sink: Arc<RecordingSink>,
        display: Arc<DisplayQueue>,
        pool: Arc<TaskPool>,
        source: Arc<MemorySource>,
    }

    fn fixture(read_only: bool) -> Fixture {
        fixture_with_workers(read_only, 2)
    }

    fn fixture_with_workers(read_only: bool, workers: usize) -> Fixture {
        let store = Arc::new(MemoryPreferenceStore::new());
        let sink = Arc::new(RecordingSink::default());
        let display = Arc::new(DisplayQueue::new());
        let pool = Arc::new(TaskPool::new("panel", workers).unwrap());
        let config = PagerConfig {
            block_size: 10,
            ..PagerConfig::default()
        };
        let context = PanelContext {
            pool: pool.clone(),
            display: display.clone(),
            sink: sink.clone(),
            store: store.clone(),
        };
        let panel = ResultPanel::new(&config, Preferences::from_config(&config), context, read_only);
        Fixture {
            panel,
            store,
            sink,
            display,
            pool,
            source: Arc::new(MemorySource::new()),
        }
    }

    fn seed(source: &MemorySource, count: usize) {
        for i in 0..count {
            source.insert(
                "shop.people",
                from_json(json!({"_id": i, "name": format!("p{i}"), "age": 20 + i})),
            );
        }
    }

    fn person(i: usize) -> Document {
        from_json(json!({"_id": i, "name": format!("p{i}"), "age": 20 + i}))
    }

    fn people(source: &Arc<MemorySource>, criteria: FindCriteria) -> QueryResult {
        QueryResult::find(source.clone(), "shop.people", criteria)
    }

    fn show(f: &Fixture, result: QueryResult) -> ExecutionReport {
        let report = f.panel.set_result(result).unwrap().wait().unwrap();
        assert!(report.is_success(), "{:?}", report.outcome);
        report
    }

    fn ids(view: &SnapshotView) -> Vec<i64> {
        view.rows().iter().map(|d| d["_id"].as_i64().unwrap()).collect()
    }

    fn assert_views_share_one_cache(panel: &ResultPanel) {
        let cache = panel.view(ViewKind::TreeTable).pages().cache();
        for kind in ViewKind::ALL {
            assert!(Arc::ptr_eq(&panel.view(kind).pages().cache(), &cache), "{kind}");
        }
    }

    #[test]
    fn test_empty_panel_status() {
        let f = fixture(false);
        let status = f.panel.pagination_status();
        assert_eq!(
            status,
            PaginationStatus {
                total: 0,
                page_number: 0,
                page_count: 1,
                can_move_backward: false,
                can_move_forward: false,
            }
        );
        assert_eq!(status.label(), "0/1 (0 documents)");
        assert!(!f.panel.is_busy());
    }

    #[test]
    fn test_set_result_and_navigate() {
        let f = fixture(false);
        seed(&f.source, 45);
        let report = show(&f, people(&f.source, FindCriteria::default()));
        assert_eq!(report.outcome, Outcome::Success { record_count: 45 });
        assert_eq!(
            f.sink.lines(),
            vec!["success", "Showing 45 records that match the query"]
        );

        let tree = f.panel.view(ViewKind::TreeTable);
        assert_eq!(ids(&tree), (0..20).collect::<Vec<_>>());
        assert_views_share_one_cache(&f.panel);

        f.panel.move_last().unwrap().wait().unwrap();
        assert_eq!(ids(&tree), (40..45).collect::<Vec<_>>());
        f.panel.move_next().unwrap().wait().unwrap();
        assert_eq!(f.panel.pagination_status().page_number, 3);

        f.display.run_pending();
        let shown = f.panel.displayed_status();
        assert_eq!(shown.label(), "3/3 (45 documents)");
        assert!(shown.can_move_backward);
        assert!(!shown.can_move_forward);

        f.panel.move_previous().unwrap().wait().unwrap();
        f.panel.move_first().unwrap().wait().unwrap();
        assert_eq!(ids(&tree), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_new_result_starts_every_view_on_first_page() {
        let f = fixture(false);
        seed(&f.source, 45);
        show(&f, people(&f.source, FindCriteria::default()));
        f.panel.move_last().unwrap().wait().unwrap();

        let only_p3 = FindCriteria::default().with_filter(from_json(json!({"name": "p3"})));
        show(&f, people(&f.source, only_p3.clone()));
        assert_eq!(f.panel.current_result(), people(&f.source, only_p3));
        for kind in ViewKind::ALL {
            assert_eq!(f.panel.view(kind).pages().page_index(), 0);
            assert_eq!(ids(&f.panel.view(kind)), vec![3]);
        }
    }

    #[test]
    fn test_failed_set_result_reports_and_empties_views() {
        let f = fixture(false);
        seed(&f.source, 5);
        let shown = people(&f.source, FindCriteria::default());
        show(&f, shown.clone());
        assert_eq!(ids(&f.panel.active_view()), (0..5).collect::<Vec<_>>());

        let refused = numbered_result(Arc::new(NumberedSource::new(5).failing_count()));
        let report = f.panel.set_result(refused).unwrap().wait().unwrap();

        assert_eq!(
            report.outcome,
            Outcome::Failure {
                message: "count refused".into()
            }
        );
        assert_eq!(&f.sink.lines()[2..], &["failure", "count refused"]);
        for kind in ViewKind::ALL {
            let view = f.panel.view(kind);
            assert!(view.rows().is_empty(), "{kind}");
            assert_eq!(view.pages().total_elements_count(), 0);
        }
        assert_eq!(f.panel.current_result(), shown);
    }

    #[test]
    fn test_second_set_result_rejected_while_executing() {
        let f = fixture(false);
        let (source, gate) = NumberedSource::new(3).gated();
        let running = f.panel.set_result(numbered_result(Arc::new(source))).unwrap();
        gate.entered.recv().unwrap();

        seed(&f.source, 2);
        assert!(matches!(
            f.panel.set_result(people(&f.source, FindCriteria::default())),
            Err(PagerError::QueryInFlight)
        ));
        assert!(f.panel.is_busy());
        gate.release.send(()).unwrap();
        assert!(running.wait().unwrap().is_success());
        assert!(!f.panel.is_busy());
    }

    #[test]
    fn test_navigation_during_set_result_does_not_drop_the_new_result() {
        let f = fixture(false);
        seed(&f.source, 30);
        show(&f, people(&f.source, FindCriteria::default()));

        let (source, gate) = NumberedSource::new(25).gated();
        let numbers = numbered_result(Arc::new(source));
        let executing = f.panel.set_result(numbers.clone()).unwrap();
        gate.entered.recv().unwrap();
        f.panel.move_next().unwrap().wait().unwrap();
        assert_eq!(f.panel.pagination_status().page_number, 2);
        gate.release.send(()).unwrap();
        assert!(executing.wait().unwrap().is_success());

        assert_eq!(f.panel.current_result(), numbers);
        for kind in ViewKind::ALL {
            let pages = f.panel.view(kind).pages().clone();
            assert_eq!(pages.query_result(), numbers, "{kind}");
            assert_eq!(pages.page_index(), 0);
        }

        let mut updated = numbered(1);
        updated.insert("note".into(), json!("edited"));
        f.panel.edit_document(&numbered(1), updated.clone()).unwrap();
        assert_eq!(f.panel.active_view().rows()[1], updated);
    }

    #[test]
    fn test_busy_while_navigation_is_queued() {
        let f = fixture_with_workers(false, 1);
        seed(&f.source, 5);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let blocker = f
            .pool
            .submit(move || {
                release_rx.recv().ok();
            })
            .unwrap();

        let navigation = f.panel.move_next().unwrap();
        assert!(f.panel.is_busy());
        release_tx.send(()).unwrap();
        blocker.wait().unwrap();
        navigation.wait().unwrap();
        assert!(!f.panel.is_busy());
    }

    #[test]
    fn test_change_page_size_rejects_bad_input_and_persists() {
        let f = fixture(false);
        seed(&f.source, 90);
        show(&f, people(&f.source, FindCriteria::default()));

        assert!(matches!(
            f.panel.change_page_size("zero"),
            Err(PagerError::InvalidPageSize(_))
        ));
        assert!(f.panel.change_page_size("0").is_err());
        assert_eq!(f.store.get(PAGE_SIZE_KEY).unwrap(), None);

        f.panel.move_last().unwrap().wait().unwrap();
        f.panel.change_page_size("10").unwrap().wait().unwrap();
        for kind in ViewKind::ALL {
            assert_eq!(f.panel.view(kind).pages().page_size(), 10);
        }
        assert_eq!(f.panel.pagination_status().page_number, 9);
        assert_eq!(f.panel.pagination_status().page_count, 9);
        assert_eq!(f.store.get(PAGE_SIZE_KEY).unwrap().as_deref(), Some("10"));
    }

    #[test]
    fn test_change_result_view_moves_status() {
        let f = fixture(false);
        seed(&f.source, 45);
        let result = people(&f.source, FindCriteria::default());
        show(&f, result.clone());

        assert!(f.panel.change_result_view(ViewKind::Text).unwrap().is_none());
        let text = f.panel.view(ViewKind::Text);
        assert_eq!(text.pages().query_result(), result);
        assert_eq!(ids(&text), (0..20).collect::<Vec<_>>());
        assert_eq!(f.store.get(RESULT_VIEW_KEY).unwrap().as_deref(), Some("text"));

        // Only the active view drives the displayed status
        f.panel.view(ViewKind::TreeTable).pages().move_last();
        f.panel.move_next().unwrap().wait().unwrap();
        f.display.run_pending();
        assert_eq!(f.panel.displayed_status().page_number, 2);

        assert!(f.panel.change_result_view(ViewKind::TreeTable).unwrap().is_none());
        f.display.run_pending();
        assert_eq!(f.panel.displayed_status().page_number, 3);
    }

    #[test]
    fn test_change_result_view_rebinds_to_the_shared_cache() {
        let f = fixture(false);
        seed(&f.source, 45);
        show(&f, people(&f.source, FindCriteria::default()));
        let shared = f.panel.view(ViewKind::TreeTable).pages().cache();

        // Something else was shown in the text view meanwhile
        let other = ResultCache::new(numbered_result(Arc::new(NumberedSource::new(4))), 10).unwrap();
        f.panel.view(ViewKind::Text).pages().bind(Arc::new(other));

        let rebind = f.panel.change_result_view(ViewKind::Text).unwrap();
        rebind.unwrap().wait().unwrap();
        let text = f.panel.view(ViewKind::Text);
        assert!(Arc::ptr_eq(&text.pages().cache(), &shared));
        assert_eq!(ids(&text), (0..20).collect::<Vec<_>>());
        assert_eq!(f.panel.current_result().namespace(), Some("shop.people"));
    }

    #[test]
    fn test_edit_reaches_sibling_view_beyond_its_loaded_pages() {
        let f = fixture(false);
        seed(&f.source, 45);
        show(&f, people(&f.source, FindCriteria::default()));
        for kind in [ViewKind::Text, ViewKind::TreeTable] {
            assert!(f.panel.change_result_view(kind).unwrap().is_none());
        }

        f.panel.move_last().unwrap().wait().unwrap();
        let mut updated = person(42);
        updated.insert("name".into(), json!("renamed"));
        f.panel.edit_document(&person(42), updated.clone()).unwrap();

        assert!(f.panel.change_result_view(ViewKind::Text).unwrap().is_none());
        f.panel.move_last().unwrap().wait().unwrap();
        let text = f.panel.view(ViewKind::Text);
        assert_eq!(ids(&text), (40..45).collect::<Vec<_>>());
        assert_eq!(text.rows()[2], updated);
        assert_views_share_one_cache(&f.panel);
    }

    #[test]
    fn test_edit_strips_hidden_fields_and_reaches_every_view() {
        let f = fixture(false);
        seed(&f.source, 3);
        let projected = FindCriteria::default().with_projection(from_json(json!({"name": 1})));
        show(&f, people(&f.source, projected));

        let previous = from_json(json!({"_id": 1, "name": "p1"}));
        let edited = from_json(json!({"_id": 1, "name": "renamed", "age": 99}));
        let propagated = f.panel.edit_document(&previous, edited).unwrap();

        let expected = from_json(json!({"_id": 1, "name": "renamed"}));
        assert_eq!(propagated, expected);
        for kind in ViewKind::ALL {
            let view = f.panel.view(kind);
            assert_eq!(view.rows()[1], expected);
            assert_eq!(view.pages().current_page_items().unwrap()[1], expected);
        }
    }

    #[test]
    fn test_edit_through_shared_cache_after_refresh() {
        let f = fixture(false);
        seed(&f.source, 3);
        show(&f, people(&f.source, FindCriteria::default()));
        let report = f.panel.refresh_results().unwrap().wait().unwrap();
        assert_eq!(report.outcome, Outcome::Success { record_count: 3 });
        assert_views_share_one_cache(&f.panel);

        let tree = f.panel.view(ViewKind::TreeTable);
        let text = f.panel.view(ViewKind::Text);
        let previous = tree.rows()[0].clone();
        let mut updated = previous.clone();
        updated.insert("name".into(), json!("first"));
        f.panel.edit_document(&previous, updated.clone()).unwrap();
        assert_eq!(text.rows()[0], updated);
        assert_eq!(f.panel.view(ViewKind::FlatTable).rows()[0], updated);
    }

    #[test]
    fn test_edit_conflict_is_reported() {
        let f = fixture(false);
        seed(&f.source, 3);
        show(&f, people(&f.source, FindCriteria::default()));
        let stranger = from_json(json!({"_id": 77, "name": "nobody"}));
        assert!(matches!(
            f.panel.edit_document(&stranger, stranger.clone()),
            Err(PagerError::EditConflict)
        ));
    }

    #[test]
    fn test_refresh_keeps_page_and_sees_new_documents() {
        let f = fixture(false);
        seed(&f.source, 45);
        show(&f, people(&f.source, FindCriteria::default()));
        f.panel.move_next().unwrap().wait().unwrap();

        for i in 45..70 {
            f.source
                .insert("shop.people", from_json(json!({"_id": i, "name": format!("p{i}")})));
        }
        f.panel.refresh_results().unwrap().wait().unwrap();

        let status = f.panel.pagination_status();
        assert_eq!(status.total, 70);
        assert_eq!(status.page_number, 2);
        assert_eq!(ids(&f.panel.active_view()), (20..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_read_only_panel() {
        let f = fixture(true);
        seed(&f.source, 1);
        show(&f, people(&f.source, FindCriteria::default()));
        assert_eq!(f.panel.document_edit_hint(), None);
        let doc = f.panel.active_view().rows()[0].clone();
        assert!(matches!(
            f.panel.edit_document(&doc, doc.clone()),
            Err(PagerError::ReadOnly)
        ));
        assert!(f.panel.active_view().pages().is_read_only());
    }

    #[test]
    fn test_edit_hint_shown_until_dismissed() {
        let f = fixture(false);
        assert_eq!(f.panel.document_edit_hint(), Some(EDIT_HINT));
        f.panel.dismiss_edit_hint().unwrap();
        assert_eq!(f.panel.document_edit_hint(), None);
        assert_eq!(f.store.get(SHOW_EDIT_HINT_KEY).unwrap().as_deref(), Some("false"));
    }

    #[test]
    fn test_sort_fields_applies_to_all_views() {
        let f = fixture(false);
        f.source
            .insert("shop.people", from_json(json!({"_id": 1, "zip": "0150", "age": 40})));
        show(&f, people(&f.source, FindCriteria::default()));
        f.panel.set_sort_fields(true).unwrap();
        let rows = f.panel.active_view().rows();
        let row = &rows[0];
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["_id", "age", "zip"]);
        assert!(f.panel.view(ViewKind::Text).sort_fields());
        assert!(f.panel.preferences().sort_fields);
    }

    #[test]
    fn test_bind_cache_feeds_all_views() {
        let f = fixture(false);
        seed(&f.source, 12);
        let result = people(&f.source, FindCriteria::default());
        let cache = Arc::new(ResultCache::new(result.clone(), 10).unwrap());
        f.panel.bind_cache(cache);

        assert_eq!(f.panel.current_result(), result);
        for kind in ViewKind::ALL {
            assert_eq!(f.panel.view(kind).rows().len(), 12);
        }
        assert_views_share_one_cache(&f.panel);
        f.panel.bind_cache(Arc::new(ResultCache::empty()));
        assert_eq!(f.panel.current_result(), result);
        assert!(f.panel.active_view().rows().is_empty());
    }

    #[test]
    fn test_export_properties_follow_current_result() {
        let f = fixture(false);
        assert!(f
            .panel
            .export_properties(PathBuf::from("out.json"), true, "UTF-8")
            .is_none());
        let criteria = FindCriteria::default().with_filter(from_json(json!({"age": 30})));
        show(&f, people(&f.source, criteria));
        let props = f
            .panel
            .export_properties(PathBuf::from("out.json"), false, "UTF-8")
            .unwrap();
        assert_eq!(props.namespace, "shop.people");
        assert_eq!(props.filter, from_json(json!({"age": 30})));
        assert!(!props.json_array);
    }
}
