//! Ranking session: ties filter state → request → backend → table state.
//!
//! ## Triggers
//!
//! `search()` promotes the draft filter and goes back to page 1.
//! `set_page()` / `next_page()` / `prev_page()` move within the applied search.
//! `set_page_size()` resets to page 1 before fetching.
//! `retry()` and `refresh()` re-issue the current request.
//! Draft edits alone never fetch.
//!
//! ## Reconciliation
//!
//! Every fetch takes a new generation number. A response is applied only if
//! its generation is still the latest when it arrives; anything older is
//! dropped. A failed fetch sets the error flag but keeps the last good page on
//! screen.

use crate::api::ChartApi;
use crate::error::ChartError;
use crate::filter::{AppliedFilter, FilterState, build_request};
use crate::live::LiveEvent;
use crate::models::{DataDate, LivePrice, RankedRow, RankingPage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    Failed,
    /// A newer request was issued while this one was in flight.
    Superseded,
}

#[derive(Debug)]
struct SessionState {
    draft: FilterState,
    applied: AppliedFilter,
    page: u32,
    page_size: u32,
    data: Option<RankingPage>,
    error: Option<String>,
    loading: bool,
}

/// What the renderer needs, detached from the session lock.
#[derive(Debug, Clone)]
pub struct TableView {
    pub applied: AppliedFilter,
    pub page: u32,
    pub page_size: u32,
    pub data: Option<RankingPage>,
    pub error: Option<String>,
    pub loading: bool,
}

impl TableView {
    pub fn rows(&self) -> &[RankedRow] {
        self.data.as_ref().map(|d| d.rows.as_slice()).unwrap_or(&[])
    }

    pub fn total_pages(&self) -> u32 {
        self.data.as_ref().map(|d| d.total_pages).unwrap_or(0)
    }

    pub fn total_count(&self) -> u64 {
        self.data.as_ref().map(|d| d.total_count).unwrap_or(0)
    }

    pub fn last_updated_at(&self) -> Option<&str> {
        self.data.as_ref()?.meta.last_updated_at.as_deref()
    }

    pub fn data_date(&self) -> Option<&DataDate> {
        self.data.as_ref()?.meta.data_date.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn can_prev(&self) -> bool {
        self.page > 1
    }

    pub fn can_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

pub struct RankingSession<A: ChartApi + ?Sized> {
    api: Arc<A>,
    state: Mutex<SessionState>,
    generation: AtomicU64,
}

impl<A: ChartApi + ?Sized> RankingSession<A> {
    pub fn new(api: Arc<A>, page_size: u32) -> Self {
        Self {
            api,
            state: Mutex::new(SessionState {
                draft: FilterState::default(),
                applied: AppliedFilter::default(),
                page: 1,
                page_size: page_size.max(1),
                data: None,
                error: None,
                loading: false,
            }),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Draft ──────────────────────────────────────────────────────────────────

    /// Edit the draft filter in place. Does not fetch.
    pub fn edit_draft<R>(&self, f: impl FnOnce(&mut FilterState) -> R) -> R {
        f(&mut self.lock().draft)
    }

    pub fn snapshot(&self) -> TableView {
        let st = self.lock();
        TableView {
            applied: st.applied.clone(),
            page: st.page,
            page_size: st.page_size,
            data: st.data.clone(),
            error: st.error.clone(),
            loading: st.loading,
        }
    }

    // ── Triggers ───────────────────────────────────────────────────────────────

    /// Apply the draft and fetch page 1.
    pub async fn search(&self) -> FetchOutcome {
        {
            let mut st = self.lock();
            st.applied = st.draft.apply();
            st.page = 1;
        }
        self.fetch().await
    }

    /// Apply the draft and fetch `page` directly, in one request.
    pub async fn search_at(&self, page: u32) -> Result<FetchOutcome, ChartError> {
        if page == 0 {
            return Err(ChartError::Paging("pages start at 1".into()));
        }
        {
            let mut st = self.lock();
            st.applied = st.draft.apply();
            st.page = page;
        }
        Ok(self.fetch().await)
    }

    pub async fn set_page(&self, page: u32) -> Result<FetchOutcome, ChartError> {
        if page == 0 {
            return Err(ChartError::Paging("pages start at 1".into()));
        }
        self.lock().page = page;
        Ok(self.fetch().await)
    }

    pub async fn set_page_size(&self, page_size: u32) -> Result<FetchOutcome, ChartError> {
        if page_size == 0 {
            return Err(ChartError::Paging("page size must be positive".into()));
        }
        {
            let mut st = self.lock();
            st.page_size = page_size;
            st.page = 1;
        }
        Ok(self.fetch().await)
    }

    /// `None` when already on the last page the server reported.
    pub async fn next_page(&self) -> Option<FetchOutcome> {
        let next = {
            let st = self.lock();
            let total = st.data.as_ref().map(|d| d.total_pages).unwrap_or(0);
            (st.page < total).then_some(st.page + 1)
        }?;
        self.lock().page = next;
        Some(self.fetch().await)
    }

    pub async fn prev_page(&self) -> Option<FetchOutcome> {
        let prev = {
            let st = self.lock();
            (st.page > 1).then(|| st.page - 1)
        }?;
        self.lock().page = prev;
        Some(self.fetch().await)
    }

    /// Re-issue the current request after a failure.
    pub async fn retry(&self) -> FetchOutcome {
        self.fetch().await
    }

    /// Re-issue the current request because the server says data changed.
    pub async fn refresh(&self) -> FetchOutcome {
        self.fetch().await
    }

    async fn fetch(&self) -> FetchOutcome {
        let (generation, request) = {
            let mut st = self.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            st.loading = true;
            (generation, build_request(&st.applied, st.page, st.page_size))
        };

        let result = self.api.fetch_rankings(&request).await;

        let mut st = self.lock();
        if generation != self.generation.load(Ordering::SeqCst) {
            debug!(
                "Discarding response for page {} (generation {} superseded)",
                request.page, generation
            );
            return FetchOutcome::Superseded;
        }
        st.loading = false;

        match result {
            Ok(page) => {
                debug!(
                    "Page {}/{}: {} rows (total {})",
                    page.page,
                    page.total_pages,
                    page.rows.len(),
                    page.total_count
                );
                st.data = Some(page);
                st.error = None;
                FetchOutcome::Applied
            }
            Err(e) => {
                warn!("Ranking fetch failed: {}", e);
                st.error = Some(e.to_string());
                FetchOutcome::Failed
            }
        }
    }
}

// ── Watch loop ────────────────────────────────────────────────────────────────

/// What the watch loop reports back to its caller.
#[derive(Debug, Clone)]
pub enum WatchUpdate {
    Table(TableView),
    Tick(LivePrice),
    Connected,
    Disconnected,
    FeedClosed,
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Keep the session fresh until `cancel` fires.
///
/// Refetches on every `metricsUpdated` hint and, if `poll_every` is set, on a
/// fixed timer. Ends on its own once the feed is closed and no timer is set.
pub async fn watch<A: ChartApi + ?Sized>(
    session: &RankingSession<A>,
    events: &mut broadcast::Receiver<LiveEvent>,
    poll_every: Option<Duration>,
    cancel: &CancellationToken,
    mut on_update: impl FnMut(WatchUpdate),
) {
    let mut timer = poll_every.map(|d| tokio::time::interval_at(Instant::now() + d, d));
    let mut feed_open = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick(&mut timer) => {
                debug!("Poll timer fired");
                session.refresh().await;
                on_update(WatchUpdate::Table(session.snapshot()));
            }
            ev = events.recv(), if feed_open => match ev {
                Ok(LiveEvent::Metrics(m)) => {
                    info!("Metrics updated (trade date {:?}, {:?} stocks), refreshing", m.trade_date, m.filtered_count);
                    session.refresh().await;
                    on_update(WatchUpdate::Table(session.snapshot()));
                }
                Ok(LiveEvent::Price(p)) => on_update(WatchUpdate::Tick(p)),
                Ok(LiveEvent::Connected) => on_update(WatchUpdate::Connected),
                Ok(LiveEvent::Disconnected) => on_update(WatchUpdate::Disconnected),
                Ok(LiveEvent::Closed) | Err(RecvError::Closed) => {
                    feed_open = false;
                    on_update(WatchUpdate::FeedClosed);
                    if timer.is_none() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Watch loop lagged, {} live events skipped", n),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeApi;
    use crate::models::{HighPriceFilter, MarketType, MetricsUpdated};

    fn session() -> (Arc<FakeApi>, RankingSession<FakeApi>) {
        let api = Arc::new(FakeApi::default());
        let session = RankingSession::new(Arc::clone(&api), 10);
        (api, session)
    }

    #[tokio::test]
    async fn test_search_applies_page_and_meta() {
        let (api, s) = session();
        assert_eq!(s.search().await, FetchOutcome::Applied);

        let view = s.snapshot();
        assert_eq!(view.rows().len(), 10);
        assert_eq!(view.total_pages(), 10);
        assert_eq!(view.last_updated_at(), Some("update-1"));
        assert!(!view.has_error());
        assert!(!view.loading);
        assert_eq!(api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_draft_edits_do_not_fetch_until_search() {
        let (api, s) = session();
        s.edit_draft(|f| {
            f.set_market(MarketType::Kospi);
            f.set_high_price(HighPriceFilter::Only);
        });
        assert_eq!(api.request_count(), 0);

        s.search().await;
        let req = api.last_request().unwrap();
        assert_eq!(req.market_type, MarketType::Kospi);
        assert_eq!(req.filters.unwrap().is_high_price, Some(true));
    }

    #[tokio::test]
    async fn test_paging_uses_applied_not_draft() {
        let (api, s) = session();
        s.search().await;
        s.edit_draft(|f| f.set_market(MarketType::Kosdaq));

        s.set_page(3).await.unwrap();
        let req = api.last_request().unwrap();
        assert_eq!(req.page, 3);
        assert_eq!(req.market_type, MarketType::All);
    }

    #[tokio::test]
    async fn test_page_size_change_resets_page() {
        let (api, s) = session();
        s.search().await;
        s.set_page(4).await.unwrap();

        s.set_page_size(30).await.unwrap();
        let req = api.last_request().unwrap();
        assert_eq!(req.page, 1);
        assert_eq!(req.page_size, 30);
        assert_eq!(s.snapshot().page, 1);
    }

    #[tokio::test]
    async fn test_search_resets_page() {
        let (api, s) = session();
        s.search().await;
        s.set_page(5).await.unwrap();
        s.search().await;
        assert_eq!(api.last_request().unwrap().page, 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_stale_page_and_retry_clears_error() {
        let (api, s) = session();
        s.search().await;

        api.fail_next(1);
        assert_eq!(s.set_page(2).await.unwrap(), FetchOutcome::Failed);
        let view = s.snapshot();
        assert!(view.has_error());
        assert_eq!(view.rows()[0].rank, 1, "previous page stays visible");
        assert_eq!(view.page, 2);

        assert_eq!(s.retry().await, FetchOutcome::Applied);
        let view = s.snapshot();
        assert!(!view.has_error());
        assert_eq!(view.rows()[0].rank, 11);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_keep_latest() {
        let (api, s) = session();
        let release_2 = api.gate(2);
        let release_3 = api.gate(3);

        let (first, second, _) = tokio::join!(s.set_page(2), s.set_page(3), async {
            // Let both requests go out, then answer the newer one first.
            tokio::task::yield_now().await;
            let _ = release_3.send(());
            tokio::task::yield_now().await;
            let _ = release_2.send(());
        });

        assert_eq!(first.unwrap(), FetchOutcome::Superseded);
        assert_eq!(second.unwrap(), FetchOutcome::Applied);

        let view = s.snapshot();
        assert_eq!(view.page, 3);
        assert_eq!(view.data.as_ref().unwrap().page, 3);
        assert_eq!(view.rows()[0].rank, 21);
    }

    #[tokio::test]
    async fn test_next_and_prev_respect_bounds() {
        let (_api, s) = session();
        assert!(s.prev_page().await.is_none());
        assert!(s.next_page().await.is_none(), "no server totals yet");

        s.search().await;
        assert_eq!(s.next_page().await, Some(FetchOutcome::Applied));
        assert_eq!(s.snapshot().page, 2);

        s.set_page(10).await.unwrap();
        assert!(s.next_page().await.is_none());
        assert_eq!(s.prev_page().await, Some(FetchOutcome::Applied));
        assert_eq!(s.snapshot().page, 9);
    }

    #[tokio::test]
    async fn test_zero_page_is_rejected() {
        let (api, s) = session();
        assert!(s.set_page(0).await.is_err());
        assert!(s.set_page_size(0).await.is_err());
        assert_eq!(api.request_count(), 0);
    }

    #[tokio::test]
    async fn test_search_at_fetches_the_page_once() {
        let (api, s) = session();
        s.edit_draft(|d| d.set_market(MarketType::Kosdaq));

        assert_eq!(s.search_at(4).await.unwrap(), FetchOutcome::Applied);
        assert_eq!(api.request_count(), 1);
        let req = api.last_request().unwrap();
        assert_eq!(req.page, 4);
        assert_eq!(req.market_type, MarketType::Kosdaq);
        assert_eq!(s.snapshot().page, 4);

        assert!(s.search_at(0).await.is_err());
        assert_eq!(api.request_count(), 1);
    }

    #[test]
    fn test_loading_flag_while_in_flight() {
        let (api, s) = session();
        let release = api.gate(1);

        let mut search = tokio_test::task::spawn(s.search());
        tokio_test::assert_pending!(search.poll());
        assert!(s.snapshot().loading);

        let _ = release.send(());
        assert!(search.is_woken());
        assert_eq!(tokio_test::assert_ready!(search.poll()), FetchOutcome::Applied);
        assert!(!s.snapshot().loading);
    }

    #[tokio::test]
    async fn test_watch_refreshes_on_metrics_hint() {
        let (api, s) = session();
        s.search().await;

        let (tx, mut rx) = broadcast::channel(8);
        let cancel = CancellationToken::new();
        tx.send(LiveEvent::Connected).unwrap();
        tx.send(LiveEvent::Metrics(MetricsUpdated::default())).unwrap();

        let mut seen = Vec::new();
        watch(&s, &mut rx, None, &cancel, |u| {
            if matches!(u, WatchUpdate::Table(_)) {
                cancel.cancel();
            }
            seen.push(u);
        })
        .await;

        assert!(matches!(seen[0], WatchUpdate::Connected));
        assert!(matches!(seen[1], WatchUpdate::Table(_)));
        assert_eq!(api.request_count(), 2);
    }

    #[tokio::test]
    async fn test_watch_ends_when_feed_closes_without_timer() {
        let (_api, s) = session();
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(LiveEvent::Closed).unwrap();

        let mut closed = false;
        watch(&s, &mut rx, None, &CancellationToken::new(), |u| {
            closed |= matches!(u, WatchUpdate::FeedClosed);
        })
        .await;
        assert!(closed);
    }

    #[tokio::test]
    async fn test_watch_timer_polls() {
        let (api, s) = session();
        let (_tx, mut rx) = broadcast::channel::<LiveEvent>(8);
        let cancel = CancellationToken::new();

        let mut polls = 0;
        watch(&s, &mut rx, Some(Duration::from_millis(5)), &cancel, |u| {
            if matches!(u, WatchUpdate::Table(_)) {
                polls += 1;
                if polls == 2 {
                    cancel.cancel();
                }
            }
        })
        .await;
        assert_eq!(api.request_count(), 2);
    }
}
