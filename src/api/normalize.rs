//! Response normalization: one function per endpoint turning the backend's
//! loosely-typed payloads into domain types.
//!
//! Formats accepted on the wire:
//! - numbers: JSON numbers, or strings like `"123.45"`, `"1,234"`, `"+1.5%"`
//! - candle time: anything starting with `YYYY-MM-DD` (`"2024-05-01T00:00:00Z"`)
//! - request dates: compact `YYYYMMDD`

use crate::error::ChartError;
use crate::models::{
    Candle, CandleType, ChartDetail, LivePrice, MarketType, NumOrStr, PriceUpdated, RankHistory,
    RankedRow, RankingMeta, RankingPage, RawCandle, RawChartResponse, RawRankedRow,
    RawRankingResponse,
};
use chrono::NaiveDate;
use tracing::warn;

// ── Scalars ───────────────────────────────────────────────────────────────────

/// Parse a numeric string: strips whitespace, thousands separators, `%` and a
/// leading `+`. Blank, `-` and `N/A` are absent values.
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "-" || s == "—" || s.eq_ignore_ascii_case("n/a") {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| *c != ',' && *c != '%' && !c.is_whitespace())
        .collect();
    cleaned.trim_start_matches('+').parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn num(v: &NumOrStr) -> Option<f64> {
    match v {
        NumOrStr::Num(n) => Some(*n),
        NumOrStr::Str(s) => parse_number(s),
    }
}

fn required(v: &NumOrStr, field: &str, ctx: &str) -> Result<f64, ChartError> {
    num(v).ok_or_else(|| ChartError::Decode(format!("{}: field '{}' is not numeric: {:?}", ctx, field, v)))
}

fn text(v: &NumOrStr) -> String {
    match v {
        NumOrStr::Num(n) if n.fract() == 0.0 => format!("{}", *n as i64),
        NumOrStr::Num(n) => n.to_string(),
        NumOrStr::Str(s) => s.trim().to_string(),
    }
}

/// `2024-05-01T00:00:00Z` → 2024-05-01.
pub fn truncate_date(s: &str) -> Option<NaiveDate> {
    let head = s.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Digits-only date used in RS filters.
pub fn compact_date(d: NaiveDate) -> String {
    d.format("%Y%m%d").to_string()
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// ── Ranking ───────────────────────────────────────────────────────────────────

pub fn ranked_row(raw: RawRankedRow) -> Result<RankedRow, ChartError> {
    let ctx = format!("stock {}", raw.stock_code);
    let rank = required(&raw.rank, "rank", &ctx)? as i64;

    let mut history = [None; 3];
    for (slot, v) in history.iter_mut().zip(raw.rank_change3_days.iter()) {
        *slot = v.as_ref().and_then(num).map(|n| n as i64);
    }
    if raw.rank_change3_days.len() > 3 {
        warn!("{}: {} rank history points, keeping 3", ctx, raw.rank_change3_days.len());
    }

    Ok(RankedRow {
        id: raw.id.as_ref().map(text).unwrap_or_else(|| raw.stock_code.clone()),
        code: raw.stock_code.trim().to_string(),
        rank,
        company_name: raw.company_name.trim().to_string(),
        current_price: raw.current_price.as_ref().and_then(num),
        exchange: raw.exchange.trim().to_string(),
        rs_score: raw.relative_strength_score.as_ref().and_then(num),
        is_high_price: raw.is_high_price,
        indicators: non_empty(raw.investment_indicators),
        indicators_detail: non_empty(raw.investment_indicators_dtl),
        theme: non_empty(raw.theme),
        industry: non_empty(raw.up_name),
        rank_history: RankHistory(history),
    })
}

/// `POST /real-time-chart/stocks` → [`RankingPage`].
///
/// Paging numbers are the server's; nothing here recomputes totals.
pub fn ranking_page(raw: RawRankingResponse) -> Result<RankingPage, ChartError> {
    let market_type = match raw.market_type.as_deref() {
        Some(m) => m.parse::<MarketType>().map_err(ChartError::Decode)?,
        None => MarketType::All,
    };
    let rows = raw
        .stocks
        .into_iter()
        .map(ranked_row)
        .collect::<Result<Vec<_>, _>>()?;
    let meta = raw
        .meta
        .map(|m| RankingMeta {
            last_updated_at: non_empty(m.last_updated_at),
            data_date: m.data_date,
        })
        .unwrap_or_default();

    Ok(RankingPage {
        market_type,
        page: raw.page,
        page_size: raw.page_size,
        total_count: raw.total_count,
        total_pages: raw.total_pages,
        rows,
        meta,
    })
}

// ── Candles ───────────────────────────────────────────────────────────────────

pub fn candle(raw: &RawCandle) -> Result<Candle, ChartError> {
    let ctx = format!("candle {}", raw.time);
    let date = truncate_date(&raw.time)
        .ok_or_else(|| ChartError::Decode(format!("unreadable candle time '{}'", raw.time)))?;
    Ok(Candle {
        date,
        open: required(&raw.open, "open", &ctx)?,
        high: required(&raw.high, "high", &ctx)?,
        low: required(&raw.low, "low", &ctx)?,
        close: required(&raw.close, "close", &ctx)?,
        volume: required(&raw.volume, "volume", &ctx)?,
    })
}

/// `GET /real-time-chart/stored/{code}` → [`ChartDetail`].
pub fn chart_detail(raw: RawChartResponse) -> Result<ChartDetail, ChartError> {
    let candle_type = match raw.candle_type.as_deref() {
        Some(t) => t.parse::<CandleType>().map_err(ChartError::Decode)?,
        None => CandleType::Day,
    };
    let candles = raw
        .candles
        .iter()
        .map(candle)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ChartDetail {
        stock_code: raw.stock_code,
        candle_type,
        candles,
    })
}

// ── Live ticks ────────────────────────────────────────────────────────────────

/// `priceUpdated` → [`LivePrice`]. Change fields are kept as text.
pub fn live_price(raw: PriceUpdated) -> Result<LivePrice, ChartError> {
    let ctx = format!("tick {}", raw.stock_code);
    Ok(LivePrice {
        price: required(&raw.price, "price", &ctx)?,
        stock_code: raw.stock_code,
        change_rate: raw.change_rate.as_ref().map(text),
        prev_day_compare: raw.prev_day_compare.as_ref().map(text),
    })
}
