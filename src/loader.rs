//! Paginated list loading for one feed.
//!
//! A loader owns the runs shown in its list panel, the next-page cursor and two
//! flags: `loading` (a fetch is in flight, so further requests are dropped) and
//! `exhausted` (a short page was seen; no further pages are ever requested by this
//! loader until [`ListLoader::reset`]).

use crate::app::{AppContext, AppState};
use crate::bus::BusEvent;
use crate::diff;
use crate::error::{Error, Result};
use crate::model::{Page, Run, RunKind};
use crate::pagination::{first_page_query, query_from_next, Pagination};
use crate::view::{Panel, ViewId, ViewTarget};

/// Rows from the end of the list at which scrolling requests the next page.
pub const SCROLL_TRIGGER_ROWS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Loaded { received: usize, exhausted: bool },
    Failed(Error),
    /// Completed for a loader generation that has since been reset.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Statuses merged; carries the runs as fetched.
    Merged(Vec<Run>),
    Failed(Error),
    Stale,
}

pub fn feed_view(feed: RunKind) -> ViewId {
    match feed {
        RunKind::Pipeline => ViewId::Pipelines,
        RunKind::PullRequest => ViewId::PullRequests,
    }
}

#[derive(Debug, Clone)]
pub struct ListLoader {
    feed: RunKind,
    page_len: usize,
    items: Vec<Run>,
    next_page: Option<String>,
    loading: bool,
    exhausted: bool,
    pagination: Option<Pagination>,
    cursor: usize,
    generation: u64,
}

impl ListLoader {
    pub fn new(feed: RunKind, page_len: usize) -> Self {
        Self {
            feed,
            page_len: page_len.max(1),
            items: Vec::new(),
            next_page: None,
            loading: false,
            exhausted: false,
            pagination: None,
            cursor: 0,
            generation: 0,
        }
    }

    pub fn feed(&self) -> RunKind {
        self.feed
    }

    pub fn view(&self) -> ViewId {
        feed_view(self.feed)
    }

    pub fn items(&self) -> &[Run] {
        &self.items
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn next_page(&self) -> Option<&str> {
        self.next_page.as_deref()
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selected(&self) -> Option<&Run> {
        self.items.get(self.cursor)
    }

    /// Row of the cursor in the shape selection handlers take.
    pub fn selected_row(&self) -> isize {
        if self.items.is_empty() {
            -1
        } else {
            isize::try_from(self.cursor).unwrap_or(isize::MAX)
        }
    }

    pub fn load_first(&mut self, panel: &mut Panel, ctx: &AppContext) -> bool {
        let query = first_page_query(self.page_len);
        self.load_next(query, false, panel, ctx)
    }

    /// Fetch the page for `query`, appending to or replacing the current items.
    /// A no-op while a fetch is in flight or after the feed was exhausted.
    pub fn load_next(
        &mut self,
        query: String,
        append: bool,
        panel: &mut Panel,
        ctx: &AppContext,
    ) -> bool {
        if !self.begin() {
            tracing::debug!(feed = ?self.feed, loading = self.loading, exhausted = self.exhausted,
                "page request dropped");
            return false;
        }
        tracing::debug!(feed = ?self.feed, %query, append, "loading page");
        let gateway = ctx.gateway.clone();
        let feed = self.feed;
        let generation = self.generation;
        ctx.runner.run(
            panel,
            async move { gateway.fetch_page(feed, &query).await },
            move |state: &mut AppState, ctx: &AppContext, result| {
                let (loader, panels) = state.loader_parts(feed);
                let panel = panels.get_mut(loader.view());
                match loader.apply_page(result, append, generation) {
                    PageOutcome::Loaded {
                        received,
                        exhausted,
                    } => {
                        panel.clear();
                        ctx.bus.publish(BusEvent::PageLoaded {
                            view: loader.view(),
                            items: received,
                            exhausted,
                        });
                    }
                    PageOutcome::Failed(e) => {
                        panel.display_error(&e);
                        ctx.bus.publish(BusEvent::FetchFailed {
                            view: loader.view(),
                            message: e.panel_message(),
                        });
                    }
                    PageOutcome::Stale => {}
                }
            },
        );
        true
    }

    /// Claim the loader for one fetch. `false` if it is busy or exhausted.
    pub fn begin(&mut self) -> bool {
        if self.loading || self.exhausted {
            return false;
        }
        self.loading = true;
        true
    }

    /// Apply a completed page fetch. Always releases `loading` for the current
    /// generation; on failure the items are left as they were.
    pub fn apply_page(&mut self, result: Result<Page>, append: bool, generation: u64) -> PageOutcome {
        if generation != self.generation {
            return PageOutcome::Stale;
        }
        self.loading = false;
        let page = match result {
            Ok(page) => page,
            Err(e) => return PageOutcome::Failed(e),
        };

        let received = page.runs.len();
        if received < self.page_len {
            self.exhausted = true;
            self.next_page = None;
        } else {
            self.next_page = page.pagination.next.as_deref().map(query_from_next);
        }

        if append {
            for run in page.runs {
                if !self.items.iter().any(|r| r.id == run.id) {
                    self.items.push(run);
                }
            }
        } else {
            self.items = page.runs;
            self.cursor = self.cursor.min(self.items.len().saturating_sub(1));
        }
        self.pagination = Some(page.pagination);
        PageOutcome::Loaded {
            received,
            exhausted: self.exhausted,
        }
    }

    /// Move the cursor down one row. Returns the next-page query when the cursor
    /// reached the last rows and a next page is known; the cursor is consumed so a
    /// second scroll cannot request the same page again.
    pub fn move_down(&mut self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1).min(self.items.len() - 1);
        if !self.loading && self.cursor + SCROLL_TRIGGER_ROWS >= self.items.len() {
            self.next_page.take()
        } else {
            None
        }
    }

    pub fn move_up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// Re-fetch the first page and merge statuses into the current items without
    /// touching pagination. Skipped while any fetch is in flight.
    pub fn refresh_in_place(&mut self, panel: &mut Panel, ctx: &AppContext) -> bool {
        if self.loading {
            return false;
        }
        if self.items.is_empty() && self.pagination.is_none() {
            // Nothing loaded yet (or the first load failed): a refresh is a first load.
            self.exhausted = false;
            return self.load_first(panel, ctx);
        }
        self.loading = true;
        let gateway = ctx.gateway.clone();
        let feed = self.feed;
        let generation = self.generation;
        let query = first_page_query(self.page_len);
        ctx.runner.run(
            panel,
            async move { gateway.fetch_page(feed, &query).await },
            move |state: &mut AppState, ctx: &AppContext, result| {
                let (loader, _) = state.loader_parts(feed);
                let before = loader.items.clone();
                match loader.merge_refresh(result, generation) {
                    RefreshOutcome::Merged(fetched) => {
                        for run in diff::detect_transitions(&before, &fetched) {
                            ctx.bus.publish(BusEvent::RunFinished(run));
                        }
                        state.refresh_succeeded(feed);
                    }
                    RefreshOutcome::Failed(e) => state.refresh_failed(&e),
                    RefreshOutcome::Stale => {}
                }
            },
        );
        true
    }

    /// Replace known runs by id and put runs not seen before at the top.
    pub fn merge_refresh(&mut self, result: Result<Page>, generation: u64) -> RefreshOutcome {
        if generation != self.generation {
            return RefreshOutcome::Stale;
        }
        self.loading = false;
        let page = match result {
            Ok(page) => page,
            Err(e) => return RefreshOutcome::Failed(e),
        };

        let mut fresh = Vec::new();
        for run in &page.runs {
            match self.items.iter_mut().find(|r| r.id == run.id) {
                Some(existing) => *existing = run.clone(),
                None => fresh.push(run.clone()),
            }
        }
        if !fresh.is_empty() {
            self.cursor += fresh.len();
            fresh.append(&mut self.items);
            self.items = fresh;
        }
        RefreshOutcome::Merged(page.runs)
    }

    /// Start over: drop items and cursor, clear both flags. A fetch still in
    /// flight for the old generation is ignored when it lands.
    pub fn reset(&mut self) {
        self.items.clear();
        self.next_page = None;
        self.loading = false;
        self.exhausted = false;
        self.pagination = None;
        self.cursor = 0;
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Target;
    use crate::status::StepState;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn run(n: u64, state: StepState) -> Run {
        Run {
            id: format!("{{p-{n}}}"),
            kind: RunKind::Pipeline,
            number: n,
            title: "main".into(),
            state,
            created_at: Utc::now(),
            completed_at: None,
            target: Target::default(),
            duration_secs: None,
            author: String::new(),
            url: String::new(),
        }
    }

    fn page(numbers: std::ops::Range<u64>, next: Option<&str>) -> Page {
        Page {
            runs: numbers.map(|n| run(n, StepState::PASSED)).collect(),
            pagination: Pagination::new(25, 10, 0, next.map(str::to_string)),
        }
    }

    fn ids(loader: &ListLoader) -> Vec<u64> {
        loader.items().iter().map(|r| r.number).collect()
    }

    #[test]
    fn begin_is_single_flight() {
        let mut loader = ListLoader::new(RunKind::Pipeline, 10);
        assert!(loader.begin());
        assert!(!loader.begin());
        loader.apply_page(Ok(page(0..10, Some("https://x/p?page=2&pagelen=10"))), false, 0);
        assert!(loader.begin());
    }

    #[test]
    fn full_page_records_cursor() {
        let mut loader = ListLoader::new(RunKind::Pipeline, 10);
        loader.begin();
        let outcome =
            loader.apply_page(Ok(page(0..10, Some("https://x/p?page=2&pagelen=10"))), false, 0);
        assert_eq!(
            outcome,
            PageOutcome::Loaded {
                received: 10,
                exhausted: false
            }
        );
        assert_eq!(loader.next_page(), Some("page=2&pagelen=10"));
        assert!(!loader.is_loading());
    }

    #[test]
    fn short_page_exhausts_for_good() {
        let mut loader = ListLoader::new(RunKind::Pipeline, 10);
        loader.begin();
        loader.apply_page(Ok(page(0..3, Some("https://x/p?page=2"))), false, 0);
        assert!(loader.is_exhausted());
        assert_eq!(loader.next_page(), None);
        assert!(!loader.begin(), "exhausted loader must refuse new fetches");
    }

    #[test]
    fn failure_keeps_items_and_releases() {
        let mut loader = ListLoader::new(RunKind::Pipeline, 10);
        loader.begin();
        loader.apply_page(Ok(page(0..10, Some("https://x/p?page=2"))), false, 0);
        loader.begin();
        let outcome = loader.apply_page(Err(Error::Network("reset by peer".into())), true, 0);
        assert_eq!(outcome, PageOutcome::Failed(Error::Network("reset by peer".into())));
        assert_eq!(loader.items().len(), 10);
        assert!(!loader.is_loading());
        assert!(!loader.is_exhausted());
    }

    #[test]
    fn append_keeps_arrival_order_and_skips_duplicates() {
        let mut loader = ListLoader::new(RunKind::Pipeline, 10);
        loader.begin();
        loader.apply_page(Ok(page(0..10, Some("https://x/p?page=2"))), false, 0);
        loader.begin();
        loader.apply_page(Ok(page(8..18, None)), true, 0);
        assert_eq!(ids(&loader), (0..18).collect::<Vec<_>>());
    }

    #[test]
    fn scrolling_near_the_end_consumes_cursor_once() {
        let mut loader = ListLoader::new(RunKind::Pipeline, 10);
        loader.begin();
        loader.apply_page(Ok(page(0..10, Some("https://x/p?page=2&pagelen=10"))), false, 0);

        for _ in 0..7 {
            assert_eq!(loader.move_down(), None);
        }
        assert_eq!(loader.cursor(), 7);
        assert_eq!(loader.move_down().as_deref(), Some("page=2&pagelen=10"));
        assert_eq!(loader.next_page(), None);
        assert_eq!(loader.move_down(), None);
        assert_eq!(loader.cursor(), 9);
        assert_eq!(loader.move_down(), None);
        assert_eq!(loader.cursor(), 9);
    }

    #[test]
    fn cursor_survives_while_loading() {
        let mut loader = ListLoader::new(RunKind::Pipeline, 10);
        loader.begin();
        loader.apply_page(Ok(page(0..10, Some("https://x/p?page=2"))), false, 0);
        loader.begin();
        for _ in 0..9 {
            assert_eq!(loader.move_down(), None);
        }
        assert_eq!(loader.next_page(), Some("page=2"));
    }

    #[test]
    fn reset_starts_a_new_generation() {
        let mut loader = ListLoader::new(RunKind::Pipeline, 10);
        loader.begin();
        loader.apply_page(Ok(page(0..4, None)), false, 0);
        assert!(loader.is_exhausted());
        loader.begin();

        loader.reset();
        assert!(!loader.is_exhausted());
        assert!(!loader.is_loading());
        assert!(loader.items().is_empty());
        assert_eq!(loader.selected_row(), -1);

        assert_eq!(
            loader.apply_page(Ok(page(0..10, None)), false, 0),
            PageOutcome::Stale
        );
        assert!(loader.items().is_empty());
        assert!(loader.begin());
    }

    #[test]
    fn refresh_merges_by_id_and_prepends_new_runs() {
        let mut loader = ListLoader::new(RunKind::Pipeline, 3);
        loader.begin();
        let mut first = page(10..13, Some("https://x/p?page=2"));
        first.runs[0].state = StepState::IN_PROGRESS;
        loader.apply_page(Ok(first), false, 0);
        loader.move_down();
        assert_eq!(loader.cursor(), 1);

        loader.loading = true;
        let refreshed = Page {
            runs: vec![run(9, StepState::PENDING), run(10, StepState::PASSED), run(11, StepState::PASSED)],
            pagination: Pagination::new(26, 3, 0, Some("https://x/p?page=2".into())),
        };
        let outcome = loader.merge_refresh(Ok(refreshed.clone()), 0);
        assert_eq!(outcome, RefreshOutcome::Merged(refreshed.runs));
        assert_eq!(ids(&loader), vec![9, 10, 11, 12]);
        assert_eq!(loader.items()[1].state, StepState::PASSED);
        assert_eq!(loader.cursor(), 2, "cursor stays on the same run");
        assert_eq!(loader.pagination().map(|p| p.size), Some(25));
        assert!(!loader.is_loading());
    }

    #[test]
    fn selected_row_tracks_cursor() {
        let mut loader = ListLoader::new(RunKind::PullRequest, 10);
        assert_eq!(loader.view(), ViewId::PullRequests);
        loader.begin();
        loader.apply_page(Ok(page(0..5, None)), false, 0);
        loader.move_down();
        loader.move_down();
        loader.move_up();
        assert_eq!(loader.selected_row(), 1);
        assert_eq!(loader.selected().map(|r| r.number), Some(1));
    }
}
