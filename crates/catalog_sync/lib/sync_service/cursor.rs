//! Cursor-based traversal for history backends that load pages asynchronously server-side.
//!
//! Such backends answer "nothing yet" with an empty page while they are still fetching, so an
//! empty page is retried a few times with exponential backoff before it is taken as the end.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::retry::compute_backoff_delay;
use super::types::{FetchError, RetryPolicy};

/// Total attempts for a page request before an empty answer counts as the end of history.
pub const EMPTY_PAGE_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_EMPTY_PAGE_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A history entry the cursor can advance over.
pub trait CursorEntry {
    /// Provider id used as `from_id` for the next page.
    fn cursor_id(&self) -> i64;
    /// Unix seconds used for the timestamp floor.
    fn timestamp(&self) -> i64;
}

/// One page request against the backend, newest entries first.
pub trait PageFetcher: Send + Sync {
    type Entry: CursorEntry + Send;

    fn fetch_page<'a>(
        &'a self,
        from_id: i64,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Self::Entry>, FetchError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorConfig {
    pub page_size: usize,
    /// Entries older than this (unix seconds) are dropped and end the traversal.
    pub timestamp_floor: Option<i64>,
    /// Quota on entries, counted both before and after the floor filter.
    pub max_items: Option<usize>,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            timestamp_floor: None,
            max_items: None,
            max_attempts: EMPTY_PAGE_MAX_ATTEMPTS,
            base_delay: DEFAULT_EMPTY_PAGE_BASE_DELAY,
        }
    }
}

/// Owned and mutated only by [`PaginationCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorState {
    /// `0` requests the newest page.
    pub from_id: i64,
    pub reached_end: bool,
    /// Raw entries received, before any filtering.
    pub scanned_count: usize,
}

pub struct PaginationCursor<F: PageFetcher> {
    fetcher: F,
    config: CursorConfig,
    state: CursorState,
    emitted_count: usize,
    cancel: CancellationToken,
}

impl<F: PageFetcher> PaginationCursor<F> {
    pub fn new(fetcher: F, config: CursorConfig, cancel: CancellationToken) -> Self {
        Self {
            fetcher,
            config,
            state: CursorState::default(),
            emitted_count: 0,
            cancel,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn has_next(&self) -> bool {
        !self.state.reached_end
    }

    pub fn emitted_count(&self) -> usize {
        self.emitted_count
    }

    /// Fetches the next page and returns the entries that pass the floor and quota.
    ///
    /// Once the cursor is done this returns an empty page without touching the backend.
    /// Cancellation marks the cursor done and returns an empty page.
    pub async fn next_batch(&mut self) -> Result<Vec<F::Entry>, FetchError> {
        if self.state.reached_end {
            return Ok(Vec::new());
        }

        let limit = self.config.page_size.max(1);
        let max_attempts = self.config.max_attempts.max(1);
        let backoff = RetryPolicy::exponential(max_attempts, self.config.base_delay);
        let mut failed_attempts = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                self.state.reached_end = true;
                return Ok(Vec::new());
            }

            let last_error = match self.fetcher.fetch_page(self.state.from_id, limit).await {
                Ok(page) if !page.is_empty() => return Ok(self.accept_page(page, limit)),
                Ok(_) => None,
                Err(err) if err.is_retryable() => Some(err),
                Err(err) => return Err(err),
            };

            failed_attempts += 1;
            if failed_attempts >= max_attempts {
                return match last_error {
                    Some(err) => Err(err),
                    None => {
                        tracing::debug!(
                            event = "cursor_history_exhausted",
                            from_id = self.state.from_id,
                            scanned_count = self.state.scanned_count,
                            attempts = failed_attempts,
                            "empty page after all attempts; treating history as complete"
                        );
                        self.state.reached_end = true;
                        Ok(Vec::new())
                    }
                };
            }

            let delay = compute_backoff_delay(&backoff, failed_attempts, 0);
            tracing::debug!(
                event = "cursor_page_retry",
                from_id = self.state.from_id,
                attempt = failed_attempts,
                delay_ms = delay.as_millis() as u64,
                error = last_error.as_ref().map(|err| err.message.as_str()),
                "page request came back empty or failed; retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.state.reached_end = true;
                    return Ok(Vec::new());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn accept_page(&mut self, page: Vec<F::Entry>, limit: usize) -> Vec<F::Entry> {
        let raw_len = page.len();
        if let Some(last) = page.last() {
            self.state.from_id = last.cursor_id();
        }
        self.state.scanned_count = self.state.scanned_count.saturating_add(raw_len);
        if raw_len < limit {
            self.state.reached_end = true;
        }

        let mut kept = match self.config.timestamp_floor {
            Some(floor) => {
                let kept: Vec<_> = page
                    .into_iter()
                    .filter(|entry| entry.timestamp() >= floor)
                    .collect();
                // Newest-first: anything below the floor means older pages are below it too.
                if kept.len() < raw_len {
                    self.state.reached_end = true;
                }
                kept
            }
            None => page,
        };

        if let Some(max_items) = self.config.max_items {
            kept.truncate(max_items.saturating_sub(self.emitted_count));
            if self.emitted_count + kept.len() >= max_items
                || self.state.scanned_count >= max_items
            {
                self.state.reached_end = true;
            }
        }

        self.emitted_count += kept.len();
        kept
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::future::BoxFuture;
    use tokio_util::sync::CancellationToken;

    use super::{CursorConfig, CursorEntry, PageFetcher, PaginationCursor};
    use crate::sync_service::types::{FetchError, FetchErrorKind};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Entry {
        id: i64,
        ts: i64,
    }

    impl CursorEntry for Entry {
        fn cursor_id(&self) -> i64 {
            self.id
        }
        fn timestamp(&self) -> i64 {
            self.ts
        }
    }

    #[derive(Default)]
    struct ScriptedPages {
        pages: Mutex<VecDeque<Result<Vec<Entry>, FetchError>>>,
        requested_from: Mutex<Vec<i64>>,
        calls: AtomicU32,
    }

    impl ScriptedPages {
        fn new(pages: Vec<Result<Vec<Entry>, FetchError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().collect()),
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PageFetcher for &ScriptedPages {
        type Entry = Entry;

        fn fetch_page<'a>(
            &'a self,
            from_id: i64,
            _limit: usize,
        ) -> BoxFuture<'a, Result<Vec<Entry>, FetchError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.requested_from
                    .lock()
                    .expect("requested_from mutex poisoned")
                    .push(from_id);
                self.pages
                    .lock()
                    .expect("pages mutex poisoned")
                    .pop_front()
                    .unwrap_or_else(|| Ok(Vec::new()))
            })
        }
    }

    fn page(ids: std::ops::RangeInclusive<i64>, ts: i64) -> Vec<Entry> {
        ids.rev().map(|id| Entry { id, ts }).collect()
    }

    fn config(page_size: usize) -> CursorConfig {
        CursorConfig {
            page_size,
            base_delay: Duration::from_millis(100),
            ..CursorConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pages_are_retried_with_backoff_before_a_full_page() {
        let fetcher = ScriptedPages::new(vec![Ok(vec![]), Ok(vec![]), Ok(page(1..=4, 10))]);
        let mut cursor = PaginationCursor::new(&fetcher, config(4), CancellationToken::new());

        let started = tokio::time::Instant::now();
        let batch = cursor.next_batch().await.expect("third attempt returns a page");

        assert_eq!(batch.len(), 4);
        assert!(!cursor.state().reached_end);
        assert!(cursor.has_next());
        assert_eq!(fetcher.calls(), 3);
        // 100ms after the first empty page, 200ms after the second.
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(cursor.state().from_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_empty_pages_end_traversal_and_later_calls_do_not_fetch() {
        let fetcher = ScriptedPages::new(vec![Ok(vec![]), Ok(vec![]), Ok(vec![])]);
        let mut cursor = PaginationCursor::new(&fetcher, config(4), CancellationToken::new());

        assert!(cursor.next_batch().await.expect("empty").is_empty());
        assert!(!cursor.has_next());
        assert_eq!(fetcher.calls(), 3);

        let before = cursor.state();
        assert!(cursor.next_batch().await.expect("done").is_empty());
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(cursor.state(), before);
    }

    #[tokio::test]
    async fn short_page_ends_traversal_and_advances_from_id() {
        let fetcher = ScriptedPages::new(vec![Ok(page(7..=10, 10)), Ok(page(5..=6, 10))]);
        let mut cursor = PaginationCursor::new(&fetcher, config(4), CancellationToken::new());

        assert_eq!(cursor.next_batch().await.expect("page").len(), 4);
        assert_eq!(cursor.state().scanned_count, 4);
        assert_eq!(cursor.next_batch().await.expect("page").len(), 2);
        assert_eq!(cursor.state().scanned_count, 6);
        assert!(cursor.state().reached_end);

        let requested = fetcher
            .requested_from
            .lock()
            .expect("requested_from mutex poisoned")
            .clone();
        assert_eq!(requested, vec![0, 7]);
    }

    #[tokio::test]
    async fn timestamp_floor_drops_old_entries_and_ends() {
        let entries = vec![
            Entry { id: 9, ts: 300 },
            Entry { id: 8, ts: 200 },
            Entry { id: 7, ts: 100 },
        ];
        let fetcher = ScriptedPages::new(vec![Ok(entries)]);
        let mut cursor = PaginationCursor::new(
            &fetcher,
            CursorConfig {
                timestamp_floor: Some(150),
                ..config(3)
            },
            CancellationToken::new(),
        );

        let batch = cursor.next_batch().await.expect("page");
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![9, 8]);
        assert!(!cursor.has_next());
    }

    #[tokio::test]
    async fn quota_truncates_final_page() {
        let fetcher = ScriptedPages::new(vec![Ok(page(5..=8, 10)), Ok(page(1..=4, 10))]);
        let mut cursor = PaginationCursor::new(
            &fetcher,
            CursorConfig {
                max_items: Some(5),
                ..config(4)
            },
            CancellationToken::new(),
        );

        let first = cursor.next_batch().await.expect("page");
        let scanned_after_first = cursor.state().scanned_count;
        let second = cursor.next_batch().await.expect("page");

        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 1);
        assert_eq!(cursor.emitted_count(), 5);
        assert!(cursor.state().scanned_count >= scanned_after_first);
        assert!(!cursor.has_next());
    }

    #[tokio::test]
    async fn non_retryable_error_surfaces_immediately() {
        let fetcher = ScriptedPages::new(vec![Err(FetchError::new(
            FetchErrorKind::Unauthorized,
            "session expired",
        ))]);
        let mut cursor = PaginationCursor::new(&fetcher, config(4), CancellationToken::new());

        let err = cursor.next_batch().await.expect_err("auth error surfaces");
        assert_eq!(err.kind, FetchErrorKind::Unauthorized);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_exhaust_into_an_error() {
        let network = || Err(FetchError::new(FetchErrorKind::Network, "reset"));
        let fetcher = ScriptedPages::new(vec![network(), network(), network()]);
        let mut cursor = PaginationCursor::new(&fetcher, config(4), CancellationToken::new());

        let err = cursor.next_batch().await.expect_err("network error after retries");
        assert_eq!(err.kind, FetchErrorKind::Network);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_cursor_does_not_fetch() {
        let fetcher = ScriptedPages::new(vec![Ok(page(1..=4, 10))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut cursor = PaginationCursor::new(&fetcher, config(4), cancel);

        assert!(cursor.next_batch().await.expect("cancelled").is_empty());
        assert!(!cursor.has_next());
        assert_eq!(fetcher.calls(), 0);
    }
}
