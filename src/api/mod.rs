pub mod http_client;
pub mod normalize;

use crate::config::ApiConfig;
use crate::error::ChartError;
use crate::models::{
    CandleQuery, ChartDetail, RankingPage, RankingRequest, RawChartResponse, RawRankingResponse,
    ServerStatus,
};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info};

use self::http_client::HttpClient;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable ranking backend.
#[async_trait]
pub trait ChartApi: Send + Sync {
    async fn fetch_rankings(&self, request: &RankingRequest) -> Result<RankingPage, ChartError>;
    async fn fetch_candles(&self, query: &CandleQuery) -> Result<ChartDetail, ChartError>;
    async fn fetch_status(&self) -> Result<ServerStatus, ChartError>;
}

// ── REST client ───────────────────────────────────────────────────────────────

pub struct RestClient {
    client: HttpClient,
}

impl RestClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
        })
    }

    fn stored_path(stock_code: &str) -> String {
        format!("real-time-chart/stored/{}", stock_code.trim())
    }
}

#[async_trait]
impl ChartApi for RestClient {
    async fn fetch_rankings(&self, request: &RankingRequest) -> Result<RankingPage, ChartError> {
        debug!(
            "rankings: market={} page={} size={} filters={} rs={}",
            request.market_type,
            request.page,
            request.page_size,
            request.filters.is_some(),
            request.rs_filters.as_ref().map(|r| r.len()).unwrap_or(0)
        );
        let raw: RawRankingResponse = self
            .client
            .post_json("real-time-chart/stocks", request)
            .await?;
        normalize::ranking_page(raw)
    }

    async fn fetch_candles(&self, query: &CandleQuery) -> Result<ChartDetail, ChartError> {
        let params = [
            ("candleType", query.candle_type.as_str().to_string()),
            ("startDate", query.start_date.format("%Y-%m-%d").to_string()),
            ("endDate", query.end_date.format("%Y-%m-%d").to_string()),
        ];
        let raw: RawChartResponse = self
            .client
            .get_json(&Self::stored_path(&query.stock_code), &params)
            .await?;
        normalize::chart_detail(raw)
    }

    async fn fetch_status(&self) -> Result<ServerStatus, ChartError> {
        self.client.get_json("real-time-chart/status", &[]).await
    }
}

/// Poll `/status` until the backend reports its first computation done.
///
/// Gives up after `attempts` retries spaced `delay` apart.
pub async fn wait_until_ready<A: ChartApi + ?Sized>(
    api: &A,
    attempts: usize,
    delay: Duration,
) -> Result<ServerStatus, ChartError> {
    let strategy = FixedInterval::new(delay).take(attempts);
    let mut n = 0usize;

    Retry::spawn(strategy, || {
        n += 1;
        let attempt = n;
        async move {
            let status = api.fetch_status().await?;
            if status.initialized {
                Ok(status)
            } else {
                info!("Backend not initialized yet (attempt {})", attempt);
                Err(ChartError::Protocol("backend not initialized".into()))
            }
        }
    })
    .await
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process fake backend shared by the session and detail tests.

    use super::*;
    use crate::models::{Candle, CandleType, RankHistory, RankedRow, RankingMeta};
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    pub fn row(code: &str, rank: i64) -> RankedRow {
        RankedRow {
            id: code.to_string(),
            code: code.to_string(),
            rank,
            company_name: format!("Company {}", code),
            current_price: Some(10_000.0 + rank as f64),
            exchange: "KOSPI".into(),
            rs_score: Some(90.0 - rank as f64),
            is_high_price: rank % 2 == 0,
            indicators: Some("PER 10".into()),
            indicators_detail: None,
            theme: Some("IT/기술".into()),
            industry: None,
            rank_history: RankHistory([Some(rank + 1), None, Some(rank)]),
        }
    }

    pub fn page_for(req: &RankingRequest) -> RankingPage {
        let first = ((req.page - 1) * req.page_size) as i64 + 1;
        RankingPage {
            market_type: req.market_type,
            page: req.page,
            page_size: req.page_size,
            total_count: 95,
            total_pages: 95u32.div_ceil(req.page_size),
            rows: (0..req.page_size as i64)
                .map(|i| row(&format!("{:06}", first + i), first + i))
                .collect(),
            meta: RankingMeta {
                last_updated_at: Some(format!("update-{}", req.page)),
                data_date: None,
            },
        }
    }

    /// Fake backend. Pages can be gated so a test decides completion order,
    /// and failures can be injected.
    #[derive(Default)]
    pub struct FakeApi {
        pub requests: Mutex<Vec<RankingRequest>>,
        pub candle_queries: Mutex<Vec<CandleQuery>>,
        gates: Mutex<HashMap<u32, oneshot::Receiver<()>>>,
        candle_gates: Mutex<HashMap<NaiveDate, oneshot::Receiver<()>>>,
        fail_next: AtomicUsize,
        pub candles: Mutex<Vec<Candle>>,
        pub status_after: AtomicUsize,
        status_calls: AtomicUsize,
    }

    impl FakeApi {
        /// Hold responses for `page` until the returned sender fires.
        pub fn gate(&self, page: u32) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(page, rx);
            tx
        }

        /// Hold candle responses whose range starts at `start`.
        pub fn gate_candles(&self, start: NaiveDate) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.candle_gates.lock().unwrap().insert(start, rx);
            tx
        }

        pub fn fail_next(&self, n: usize) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn last_request(&self) -> Option<RankingRequest> {
            self.requests.lock().unwrap().last().cloned()
        }

        fn take_failure(&self) -> bool {
            self.fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn failure() -> ChartError {
            ChartError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                url: "fake://".into(),
            }
        }
    }

    #[async_trait]
    impl ChartApi for FakeApi {
        async fn fetch_rankings(&self, request: &RankingRequest) -> Result<RankingPage, ChartError> {
            self.requests.lock().unwrap().push(request.clone());
            let gate = self.gates.lock().unwrap().remove(&request.page);
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.take_failure() {
                return Err(Self::failure());
            }
            Ok(page_for(request))
        }

        async fn fetch_candles(&self, query: &CandleQuery) -> Result<ChartDetail, ChartError> {
            self.candle_queries.lock().unwrap().push(query.clone());
            let gate = self.candle_gates.lock().unwrap().remove(&query.start_date);
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.take_failure() {
                return Err(Self::failure());
            }
            let candles = self
                .candles
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.date >= query.start_date && c.date <= query.end_date)
                .cloned()
                .collect();
            Ok(ChartDetail {
                stock_code: query.stock_code.clone(),
                candle_type: CandleType::Day,
                candles,
            })
        }

        async fn fetch_status(&self) -> Result<ServerStatus, ChartError> {
            let call = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ServerStatus {
                initialized: call > self.status_after.load(Ordering::SeqCst),
                last_data_update: Some("2024-05-01T06:30:00Z".into()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeApi;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_wait_until_ready_polls_until_initialized() {
        let api = FakeApi::default();
        api.status_after.store(2, Ordering::SeqCst);

        let status = wait_until_ready(&api, 5, Duration::from_millis(1)).await.unwrap();
        assert!(status.initialized);
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up() {
        let api = FakeApi::default();
        api.status_after.store(10, Ordering::SeqCst);

        let err = wait_until_ready(&api, 2, Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(err, ChartError::Protocol(_)));
    }

    #[test]
    fn test_stored_path_trims_code() {
        assert_eq!(RestClient::stored_path(" 005930 "), "real-time-chart/stored/005930");
    }
}
