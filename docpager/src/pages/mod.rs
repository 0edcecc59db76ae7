use crate::cache::ResultCache;
use crate::document::Document;
use crate::error::{PagerError, Result};
use crate::query::QueryResult;
use crate::sync::lock;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Receives page window notifications.
///
/// Notifications are delivered synchronously on whichever thread performed
/// the change, which may be a worker thread. Listeners that touch a display
/// must redispatch to it. A listener must not navigate the window it is
/// being notified by from inside the callback.
pub trait PagesListener: Send + Sync {
    /// The window now shows `page` as page `page_index`.
    fn page_changed(&self, pages: &CollectionResultPages, page_index: usize, page: &[Document]);

    /// The document at `index` within the visible page was replaced.
    fn page_object_updated(&self, index: usize, old: &Document, new: &Document);
}

/// Handle returned by [`CollectionResultPages::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Number of pages needed to show `total` documents, at least one.
pub fn page_count_for(total: usize, page_size: usize) -> usize {
    let page_size = page_size.max(1);
    total.div_ceil(page_size).max(1)
}

/// A page-by-page window over a [`ResultCache`].
///
/// The window keeps `0 <= page_index < page_count` after every change. Any
/// number of windows may share one cache; edits made through one are seen by
/// the others the next time they compute their page.
pub struct CollectionResultPages {
    state: Mutex<Window>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn PagesListener>)>>,
    // Held while checking the generation and notifying, so a superseded page
    // can never be announced after a newer one.
    notify: Mutex<()>,
    next_listener: AtomicU64,
    block_size: usize,
    read_only: bool,
}

struct Window {
    cache: Arc<ResultCache>,
    page_size: usize,
    page_index: usize,
    /// Bumped by every request that changes the visible page.
    page_generation: u64,
    /// Bumped only by requests that replace the cache, so navigation never
    /// cancels a rebind.
    cache_generation: u64,
}

impl Window {
    fn page_count(&self) -> usize {
        page_count_for(self.cache.size(), self.page_size)
    }

    fn page_range(&self) -> Range<usize> {
        let total = self.cache.size();
        let start = (self.page_index * self.page_size).min(total);
        let end = ((self.page_index + 1) * self.page_size).min(total);
        start..end
    }

    fn next_page(&mut self) -> u64 {
        self.page_generation += 1;
        self.page_generation
    }

    fn next_cache(&mut self) -> u64 {
        self.cache_generation += 1;
        self.cache_generation
    }
}

/// How a newly installed cache positions the window.
#[derive(Clone, Copy)]
enum Rebind {
    FirstPage,
    KeepPage,
}

impl CollectionResultPages {
    /// A window over `cache`. Re-executions create caches with the same
    /// block size as `cache`.
    pub fn new(cache: Arc<ResultCache>, page_size: usize, read_only: bool) -> Self {
        let block_size = cache.block_size();
        Self::with_block_size(cache, page_size, block_size, read_only)
    }

    pub fn with_block_size(
        cache: Arc<ResultCache>,
        page_size: usize,
        block_size: usize,
        read_only: bool,
    ) -> Self {
        CollectionResultPages {
            state: Mutex::new(Window {
                cache,
                page_size: page_size.max(1),
                page_index: 0,
                page_generation: 0,
                cache_generation: 0,
            }),
            listeners: Mutex::new(Vec::new()),
            notify: Mutex::new(()),
            next_listener: AtomicU64::new(1),
            block_size: block_size.max(1),
            read_only,
        }
    }

    /// A window over the empty result.
    pub fn empty(page_size: usize, block_size: usize, read_only: bool) -> Self {
        Self::with_block_size(Arc::new(ResultCache::empty()), page_size, block_size, read_only)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn cache(&self) -> Arc<ResultCache> {
        lock(&self.state).cache.clone()
    }

    pub fn query_result(&self) -> QueryResult {
        lock(&self.state).cache.query_result().clone()
    }

    pub fn total_elements_count(&self) -> usize {
        lock(&self.state).cache.size()
    }

    pub fn page_size(&self) -> usize {
        lock(&self.state).page_size
    }

    pub fn page_index(&self) -> usize {
        lock(&self.state).page_index
    }

    pub fn page_count(&self) -> usize {
        lock(&self.state).page_count()
    }

    pub fn can_move_backward(&self) -> bool {
        lock(&self.state).page_index > 0
    }

    pub fn can_move_forward(&self) -> bool {
        let window = lock(&self.state);
        window.page_index + 1 < window.page_count()
    }

    /// Global cache indexes covered by the current page.
    pub fn current_page_range(&self) -> Range<usize> {
        lock(&self.state).page_range()
    }

    /// The documents of the current page, loading any block they need.
    pub fn current_page_items(&self) -> Result<Vec<Document>> {
        let (cache, range) = {
            let window = lock(&self.state);
            (window.cache.clone(), window.page_range())
        };
        if !range.is_empty() {
            cache.ensure_loaded(range.end - 1)?;
        }
        Ok(cache.slice(range))
    }

    /// Change the page size, keeping the first visible document on screen.
    /// Sizes below one are raised to one.
    pub fn set_page_size(&self, page_size: usize) {
        let page_size = page_size.max(1);
        let token = {
            let mut window = lock(&self.state);
            let first_visible = window.page_index * window.page_size;
            window.page_size = page_size;
            window.page_index = (first_visible / page_size).min(window.page_count() - 1);
            window.next_page()
        };
        self.show_page(token);
    }

    pub fn move_first(&self) {
        self.navigate(|_, _| 0);
    }

    pub fn move_last(&self) {
        self.navigate(|_, count| count - 1);
    }

    pub fn move_next(&self) {
        self.navigate(|index, count| (index + 1).min(count - 1));
    }

    pub fn move_previous(&self) {
        self.navigate(|index, _| index.saturating_sub(1));
    }

    fn navigate(&self, to: impl FnOnce(usize, usize) -> usize) {
        let token = {
            let mut window = lock(&self.state);
            let count = window.page_count();
            window.page_index = to(window.page_index, count).min(count - 1);
            window.next_page()
        };
        self.show_page(token);
    }

    /// Re-execute the query behind the current cache and show the new
    /// result, staying on the same page when it still exists.
    ///
    /// Returns `Ok(false)` when another rebind was requested meanwhile and
    /// this result was dropped.
    pub fn refresh(&self) -> Result<bool> {
        let (query, token) = {
            let mut window = lock(&self.state);
            (window.cache.query_result().clone(), window.next_cache())
        };
        let cache = ResultCache::new(query, self.block_size)?;
        Ok(self.install(token, Arc::new(cache), Rebind::KeepPage))
    }

    /// Execute `result` and show its first page. `Ok(false)` means a newer
    /// rebind won and this result is not shown.
    pub fn set_query_result(&self, result: QueryResult) -> Result<bool> {
        let token = lock(&self.state).next_cache();
        let cache = ResultCache::new(result, self.block_size)?;
        Ok(self.install(token, Arc::new(cache), Rebind::FirstPage))
    }

    /// Show an already executed cache, staying on the same page when it
    /// still exists.
    pub fn bind(&self, cache: Arc<ResultCache>) -> bool {
        let token = lock(&self.state).next_cache();
        self.install(token, cache, Rebind::KeepPage)
    }

    /// Show an already executed cache from its first page.
    pub fn bind_from_start(&self, cache: Arc<ResultCache>) -> bool {
        let token = lock(&self.state).next_cache();
        self.install(token, cache, Rebind::FirstPage)
    }

    /// Install `cache` if no newer rebind was requested since `token` was
    /// taken. Navigation in between does not count.
    fn install(&self, token: u64, cache: Arc<ResultCache>, rebind: Rebind) -> bool {
        let page_token = {
            let mut window = lock(&self.state);
            if window.cache_generation != token {
                log::debug!(
                    "Discarding superseded result (request {token}, now {})",
                    window.cache_generation
                );
                return false;
            }
            window.cache = cache;
            window.page_index = match rebind {
                Rebind::FirstPage => 0,
                Rebind::KeepPage => window.page_index.min(window.page_count() - 1),
            };
            window.next_page()
        };
        self.show_page(page_token);
        true
    }

    /// Load the current page and announce it, unless a newer request came
    /// in meanwhile. Load failures leave the loaded prefix of the page.
    fn show_page(&self, token: u64) {
        let (cache, index, range) = {
            let window = lock(&self.state);
            (window.cache.clone(), window.page_index, window.page_range())
        };
        if !range.is_empty() {
            if let Err(e) = cache.ensure_loaded(range.end - 1) {
                log::warn!("Page {index} is incomplete: {e}");
            }
        }
        let page = cache.slice(range);

        let _notifying = lock(&self.notify);
        if lock(&self.state).page_generation != token {
            log::debug!("Page {index} superseded before display");
            return;
        }
        for listener in self.listeners_snapshot() {
            listener.page_changed(self, index, &page);
        }
    }

    /// Replace `previous` with `updated` in the cache and tell listeners
    /// which row of the visible page changed.
    pub fn update_document(&self, previous: &Document, updated: &Document) -> Result<()> {
        let cache = self.cache();
        let index = cache
            .edit_object(previous, updated)
            .ok_or(PagerError::EditConflict)?;
        self.announce_update(&cache, index, previous, updated);
        Ok(())
    }

    /// Tell listeners about an edit another window already applied at
    /// `index` of `cache`. Returns false, without notifying, unless this
    /// window shows that very cache.
    pub fn announce_update(
        &self,
        cache: &Arc<ResultCache>,
        index: usize,
        previous: &Document,
        updated: &Document,
    ) -> bool {
        let range = {
            let window = lock(&self.state);
            if !Arc::ptr_eq(&window.cache, cache) {
                return false;
            }
            window.page_range()
        };
        if range.contains(&index) {
            let _notifying = lock(&self.notify);
            for listener in self.listeners_snapshot() {
                listener.page_object_updated(index - range.start, previous, updated);
            }
        }
        true
    }

    pub fn add_listener(&self, listener: Arc<dyn PagesListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn PagesListener>> {
        lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}
