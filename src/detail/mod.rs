//! Per-stock drill-down: daily candles for one code over a chosen date range.
//!
//! Mirrors the ranking session's reconciliation: each load takes a new
//! generation and only the latest response is applied. A failed load keeps
//! the previous candles visible and sets the error flag until `retry()`.

use crate::api::ChartApi;
use crate::error::ChartError;
use crate::models::{Candle, CandleQuery, CandleType};
use crate::session::FetchOutcome;
use crate::table::layout;
use crate::utils::fmt_decimal;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, ChartError> {
        if from > to {
            return Err(ChartError::Filter(format!(
                "date range starts after it ends ({} > {})",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    /// `days` back from `today` through `today`.
    pub fn ending_at(today: NaiveDate, days: i64) -> Self {
        Self {
            from: today - ChronoDuration::days(days.max(0)),
            to: today,
        }
    }

    pub fn last_days(days: i64) -> Self {
        Self::ending_at(Local::now().date_naive(), days)
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

#[derive(Debug)]
struct DetailState {
    range: DateRange,
    candles: Option<Vec<Candle>>,
    error: Option<String>,
    loading: bool,
    page: usize,
}

pub struct DetailView<A: ChartApi + ?Sized> {
    api: Arc<A>,
    stock_code: String,
    candle_type: CandleType,
    page_size: usize,
    state: Mutex<DetailState>,
    generation: AtomicU64,
}

impl<A: ChartApi + ?Sized> DetailView<A> {
    pub fn new(
        api: Arc<A>,
        stock_code: impl Into<String>,
        candle_type: CandleType,
        range: DateRange,
        page_size: usize,
    ) -> Self {
        Self {
            api,
            stock_code: stock_code.into().trim().to_string(),
            candle_type,
            page_size: page_size.max(1),
            state: Mutex::new(DetailState {
                range,
                candles: None,
                error: None,
                loading: false,
                page: 1,
            }),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DetailState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn range(&self) -> DateRange {
        self.lock().range
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.lock().candles.clone().unwrap_or_default()
    }

    pub async fn load(&self) -> FetchOutcome {
        let (generation, range, query) = {
            let mut st = self.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            st.loading = true;
            let query = CandleQuery {
                stock_code: self.stock_code.clone(),
                candle_type: self.candle_type,
                start_date: st.range.from,
                end_date: st.range.to,
            };
            (generation, st.range, query)
        };

        let result = self.api.fetch_candles(&query).await;

        let mut st = self.lock();
        if generation != self.generation.load(Ordering::SeqCst) {
            debug!("Discarding candles for {} (generation {} superseded)", self.stock_code, generation);
            return FetchOutcome::Superseded;
        }
        st.loading = false;

        match result {
            Ok(detail) => {
                let received = detail.candles.len();
                let candles: Vec<Candle> = detail
                    .candles
                    .into_iter()
                    .filter(|c| range.contains(c.date))
                    .collect();
                if candles.len() < received {
                    warn!(
                        "{}: dropped {} candles outside {} ~ {}",
                        self.stock_code,
                        received - candles.len(),
                        range.from,
                        range.to
                    );
                }
                debug!("{}: {} candles", self.stock_code, candles.len());
                st.candles = Some(candles);
                st.error = None;
                st.page = 1;
                FetchOutcome::Applied
            }
            Err(e) => {
                warn!("Candle fetch for {} failed: {}", self.stock_code, e);
                st.error = Some(e.to_string());
                FetchOutcome::Failed
            }
        }
    }

    /// Change the range and re-fetch.
    pub async fn set_range(&self, range: DateRange) -> FetchOutcome {
        self.lock().range = range;
        self.load().await
    }

    pub async fn retry(&self) -> FetchOutcome {
        self.load().await
    }

    // ── Local pagination ───────────────────────────────────────────────────────

    pub fn total_pages(&self) -> usize {
        let st = self.lock();
        let n = st.candles.as_ref().map(|c| c.len()).unwrap_or(0);
        n.div_ceil(self.page_size)
    }

    pub fn page(&self) -> usize {
        self.lock().page
    }

    pub fn set_page(&self, page: usize) -> Result<(), ChartError> {
        let total = self.total_pages().max(1);
        if page == 0 || page > total {
            return Err(ChartError::Paging(format!("page {} outside 1..={}", page, total)));
        }
        self.lock().page = page;
        Ok(())
    }

    pub fn page_rows(&self) -> Vec<Candle> {
        let st = self.lock();
        let Some(candles) = st.candles.as_ref() else {
            return Vec::new();
        };
        candles
            .iter()
            .skip((st.page - 1) * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect()
    }

    /// Current page as a text table, with the error banner when set.
    pub fn render(&self) -> String {
        let headers = ["일자", "종가", "시가", "고가", "저가", "거래량"]
            .map(String::from)
            .to_vec();
        let rows: Vec<Vec<String>> = self
            .page_rows()
            .iter()
            .map(|c| {
                vec![
                    c.date.to_string(),
                    fmt_decimal(c.close),
                    fmt_decimal(c.open),
                    fmt_decimal(c.high),
                    fmt_decimal(c.low),
                    fmt_decimal(c.volume),
                ]
            })
            .collect();

        let range = self.range();
        let mut out = format!(
            "{}  {} ~ {}  (page {}/{})\n",
            self.stock_code,
            range.from,
            range.to,
            self.page(),
            self.total_pages().max(1)
        );
        let loading = self.lock().loading;
        if rows.is_empty() && loading {
            out.push_str("불러오는 중...\n");
        } else if rows.is_empty() {
            out.push_str("데이터가 없습니다.\n");
        } else {
            out.push_str(&layout(&headers, &rows));
        }
        if let Some(err) = self.error() {
            out.push_str(&format!("! 조회 실패: {} (retry to reload)\n", err));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeApi;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn candle(date: &str, close: f64) -> Candle {
        Candle {
            date: d(date),
            open: close - 100.0,
            high: close + 200.0,
            low: close - 300.0,
            close,
            volume: 1_000.0,
        }
    }

    fn api_with_month() -> Arc<FakeApi> {
        let api = Arc::new(FakeApi::default());
        *api.candles.lock().unwrap() = (1..=30)
            .map(|day| candle(&format!("2024-04-{:02}", day), 70_000.0 + day as f64))
            .collect();
        api
    }

    #[test]
    fn test_date_range_validation() {
        assert!(DateRange::new(d("2024-05-02"), d("2024-05-01")).is_err());
        let same = DateRange::new(d("2024-05-01"), d("2024-05-01")).unwrap();
        assert!(same.contains(d("2024-05-01")));
    }

    #[test]
    fn test_default_range_is_lookback_ending_today() {
        let r = DateRange::ending_at(d("2024-05-08"), 7);
        assert_eq!(r.from(), d("2024-05-01"));
        assert_eq!(r.to(), d("2024-05-08"));
    }

    #[tokio::test]
    async fn test_load_only_returns_candles_in_range() {
        let api = api_with_month();
        let range = DateRange::new(d("2024-04-10"), d("2024-04-14")).unwrap();
        let view = DetailView::new(Arc::clone(&api), "005930", CandleType::Day, range, 10);

        assert_eq!(view.load().await, FetchOutcome::Applied);
        let candles = view.candles();
        assert_eq!(candles.len(), 5);
        assert!(candles.iter().all(|c| range.contains(c.date)));

        let q = api.candle_queries.lock().unwrap().last().cloned().unwrap();
        assert_eq!(q.start_date, d("2024-04-10"));
        assert_eq!(q.end_date, d("2024-04-14"));
    }

    #[tokio::test]
    async fn test_set_range_refetches_and_resets_page() {
        let api = api_with_month();
        let view = DetailView::new(
            Arc::clone(&api),
            "005930",
            CandleType::Day,
            DateRange::new(d("2024-04-01"), d("2024-04-30")).unwrap(),
            10,
        );
        view.load().await;
        assert_eq!(view.total_pages(), 3);
        view.set_page(3).unwrap();
        assert_eq!(view.page_rows().len(), 10);
        assert!(view.set_page(4).is_err());

        view.set_range(DateRange::new(d("2024-04-20"), d("2024-04-22")).unwrap())
            .await;
        assert_eq!(view.page(), 1);
        assert_eq!(view.total_pages(), 1);
        assert_eq!(api.candle_queries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_sets_error_and_retry_recovers() {
        let api = api_with_month();
        let view = DetailView::new(
            Arc::clone(&api),
            "005930",
            CandleType::Day,
            DateRange::new(d("2024-04-01"), d("2024-04-05")).unwrap(),
            10,
        );
        view.load().await;

        api.fail_next(1);
        let outcome = view
            .set_range(DateRange::new(d("2024-04-10"), d("2024-04-12")).unwrap())
            .await;
        assert_eq!(outcome, FetchOutcome::Failed);
        assert!(view.error().is_some());
        assert_eq!(view.candles().len(), 5, "previous candles stay visible");
        assert!(view.render().contains("조회 실패"));

        assert_eq!(view.retry().await, FetchOutcome::Applied);
        assert!(view.error().is_none());
        assert_eq!(view.candles().len(), 3);
    }

    #[tokio::test]
    async fn test_render_lists_current_page() {
        let api = api_with_month();
        let view = DetailView::new(
            api,
            "005930",
            CandleType::Day,
            DateRange::new(d("2024-04-01"), d("2024-04-02")).unwrap(),
            10,
        );
        view.load().await;
        let out = view.render();
        assert!(out.contains("2024-04-02"));
        assert!(out.contains("70,002"));
        assert!(out.contains("page 1/1"));
    }

    #[tokio::test]
    async fn test_out_of_order_candle_loads_keep_latest() {
        let api = api_with_month();
        let view = DetailView::new(
            Arc::clone(&api),
            "005930",
            CandleType::Day,
            DateRange::new(d("2024-04-01"), d("2024-04-30")).unwrap(),
            10,
        );
        let older = DateRange::new(d("2024-04-01"), d("2024-04-10")).unwrap();
        let newer = DateRange::new(d("2024-04-20"), d("2024-04-22")).unwrap();
        let release_older = api.gate_candles(older.from());

        let (first, second) = tokio::join!(view.set_range(older), async {
            let outcome = view.set_range(newer).await;
            release_older.send(()).unwrap();
            outcome
        });

        assert_eq!(first, FetchOutcome::Superseded);
        assert_eq!(second, FetchOutcome::Applied);
        assert_eq!(view.range(), newer);
        let dates: Vec<NaiveDate> = view.candles().iter().map(|c| c.date).collect();
        assert_eq!(dates, vec![d("2024-04-20"), d("2024-04-21"), d("2024-04-22")]);
        assert_eq!(api.candle_queries.lock().unwrap().len(), 2);
    }
}
