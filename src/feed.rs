//! Content Feed Module: paginated problem and project listings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::models::{FeedQuery, Page, Problem, Project};
use crate::repo::{Repo, RepoResult};

pub const PAGE_SIZE: usize = 4;
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

#[async_trait]
pub trait FeedSource: Send + Sync {
    type Item: Clone + Send + Sync;

    async fn fetch(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Self::Item>>;
}

pub struct ProblemSource(pub Arc<dyn Repo>);

#[async_trait]
impl FeedSource for ProblemSource {
    type Item = Problem;

    async fn fetch(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Problem>> {
        self.0.list_problems(query, offset, limit).await
    }
}

pub struct ProjectSource(pub Arc<dyn Repo>);

#[async_trait]
impl FeedSource for ProjectSource {
    type Item = Project;

    async fn fetch(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Project>> {
        self.0.list_projects(query, offset, limit).await
    }
}

/// A "load more" feed. Once exhausted it issues no further requests until
/// the query changes.
pub struct Feed<S: FeedSource> {
    source: S,
    query: FeedQuery,
    items: Vec<S::Item>,
    total: Option<u64>,
    exhausted: bool,
    requests: usize,
}

impl<S: FeedSource> Feed<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            query: FeedQuery::default(),
            items: vec![],
            total: None,
            exhausted: false,
            requests: 0,
        }
    }

    pub fn query(&self) -> &FeedQuery {
        &self.query
    }

    pub fn items(&self) -> &[S::Item] {
        &self.items
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    /// Number of pages fetched from the source so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Replaces the filters and reloads from page 1.
    pub async fn set_query(&mut self, query: FeedQuery) -> RepoResult<()> {
        self.query = query;
        self.refresh().await
    }

    pub async fn refresh(&mut self) -> RepoResult<()> {
        self.items.clear();
        self.total = None;
        self.exhausted = false;
        self.fetch_next().await.map(|_| ())
    }

    /// Appends the next page; returns how many items it added.
    pub async fn load_more(&mut self) -> RepoResult<usize> {
        if self.exhausted {
            return Ok(0);
        }
        self.fetch_next().await
    }

    async fn fetch_next(&mut self) -> RepoResult<usize> {
        let offset = self.items.len();
        let page = self.source.fetch(&self.query, offset, PAGE_SIZE).await?;
        self.requests += 1;

        let got = page.items.len();
        self.items.extend(page.items);
        self.total = page.total;
        self.exhausted = got < PAGE_SIZE || self.total.map_or(false, |t| self.items.len() as u64 >= t);
        debug!(offset, got, total = ?self.total, exhausted = self.exhausted, "feed page loaded");
        Ok(got)
    }
}

/// Holds search box input until it has been stable for the delay.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    pending: Option<(String, Instant)>,
}

impl Default for Debounce {
    fn default() -> Self {
        Self::new(SEARCH_DEBOUNCE)
    }
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    /// Records new input at `now`, restarting the delay.
    pub fn input(&mut self, text: impl Into<String>, now: Instant) {
        self.pending = Some((text.into(), now + self.delay));
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The settled input, if its delay has elapsed by `now`.
    pub fn take_ready(&mut self, now: Instant) -> Option<String> {
        match &self.pending {
            Some((_, due)) if *due <= now => self.pending.take().map(|(text, _)| text),
            _ => None,
        }
    }

    /// Sleeps until the pending input settles and returns it.
    pub async fn settled(&mut self) -> Option<String> {
        loop {
            let due = self.pending.as_ref()?.1;
            tokio::time::sleep_until(tokio::time::Instant::from_std(due)).await;
            if let Some(text) = self.take_ready(Instant::now()) {
                return Some(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Numbers {
        rows: Vec<u32>,
        report_total: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FeedSource for Numbers {
        type Item = u32;

        async fn fetch(&self, _q: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items = self.rows.iter().skip(offset).take(limit).copied().collect();
            let total = self.report_total.then_some(self.rows.len() as u64);
            Ok(Page { items, total })
        }
    }

    fn numbers(n: u32, report_total: bool) -> Numbers {
        Numbers { rows: (0..n).collect(), report_total, calls: AtomicUsize::new(0) }
    }

    #[tokio::test]
    async fn exactly_one_page_without_total_needs_one_more_request() {
        let mut feed = Feed::new(numbers(4, false));
        feed.refresh().await.unwrap();
        assert_eq!(feed.items().len(), 4);
        // a full page with no known total can't be told apart from "more to come"
        assert!(feed.has_more());
        assert_eq!(feed.load_more().await.unwrap(), 0);
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn known_total_exhausts_immediately() {
        let mut feed = Feed::new(numbers(4, true));
        feed.refresh().await.unwrap();
        assert!(!feed.has_more());
        assert_eq!(feed.load_more().await.unwrap(), 0);
        assert_eq!(feed.requests(), 1);
        assert_eq!(feed.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pages_append_until_short_page() {
        let mut feed = Feed::new(numbers(10, false));
        feed.refresh().await.unwrap();
        assert_eq!(feed.load_more().await.unwrap(), 4);
        assert_eq!(feed.load_more().await.unwrap(), 2);
        assert!(!feed.has_more());
        let expected: Vec<u32> = (0..10).collect();
        assert_eq!(feed.items(), expected.as_slice());
        assert_eq!(feed.requests(), 3);
    }

    #[tokio::test]
    async fn new_query_resets_to_first_page() {
        let mut feed = Feed::new(numbers(6, true));
        feed.refresh().await.unwrap();
        feed.load_more().await.unwrap();
        assert_eq!(feed.items().len(), 6);
        feed.set_query(FeedQuery { search: Some("x".into()), ..Default::default() }).await.unwrap();
        assert_eq!(feed.items().len(), 4);
        assert!(feed.has_more());
    }

    #[test]
    fn debounce_waits_for_quiet_input() {
        let start = Instant::now();
        let mut d = Debounce::default();
        d.input("ru", start);
        d.input("rust", start + Duration::from_millis(200));
        assert_eq!(d.take_ready(start + Duration::from_millis(400)), None);
        assert_eq!(d.take_ready(start + Duration::from_millis(500)), Some("rust".to_string()));
        assert!(!d.is_pending());
    }

    #[tokio::test]
    async fn debounce_settles() {
        let mut d = Debounce::new(Duration::from_millis(5));
        d.input("solar", Instant::now());
        assert_eq!(d.settled().await, Some("solar".to_string()));
        assert_eq!(d.settled().await, None);
    }
}
