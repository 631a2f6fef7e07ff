//! Filter state holder: draft edits, RS period weighting, and the translation
//! of an applied snapshot into a ranking request.
//!
//! Editing a [`FilterState`] never talks to the backend. Only
//! [`FilterState::apply`] produces an [`AppliedFilter`], and only an applied
//! filter can be turned into a [`RankingRequest`].

use crate::api::normalize::compact_date;
use crate::error::ChartError;
use crate::models::{HighPriceFilter, MarketType, RankingFilters, RankingRequest, RsFilter};
use chrono::NaiveDate;

pub const FULL_WEIGHT: u32 = 100;

/// One relative-strength window and its share of the composite score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsPeriod {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub weight: u32,
}

impl RsPeriod {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>, weight: u32) -> Self {
        Self { start, end, weight }
    }

    /// Both ends picked; incomplete periods are left out of requests.
    pub fn is_complete(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

impl Default for RsPeriod {
    fn default() -> Self {
        Self::new(None, None, 0)
    }
}

/// Force the weights to sum to 100.
///
/// A single period always gets the full weight. With more, every period but the
/// last keeps its own weight (clamped to 0..=100) and the last takes whatever
/// is left, floored at zero. If the others already exceed 100 the total stays
/// above 100 and the last period reads 0.
pub fn normalize_periods(periods: &mut [RsPeriod]) {
    let Some((last, rest)) = periods.split_last_mut() else {
        return;
    };

    if rest.is_empty() {
        last.weight = FULL_WEIGHT;
        return;
    }

    let mut manual = 0u32;
    for p in rest.iter_mut() {
        p.weight = p.weight.min(FULL_WEIGHT);
        manual = manual.saturating_add(p.weight);
    }
    last.weight = FULL_WEIGHT.saturating_sub(manual);
}

// ── Draft state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FilterState {
    pub market: MarketType,
    rs_periods: Vec<RsPeriod>,
    pub high_price: HighPriceFilter,
    pub themes: Vec<u32>,
    pub min_trading_value: Option<u64>,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            market: MarketType::All,
            rs_periods: vec![RsPeriod::new(None, None, FULL_WEIGHT)],
            high_price: HighPriceFilter::All,
            themes: Vec::new(),
            min_trading_value: None,
        }
    }
}

impl FilterState {
    pub fn rs_periods(&self) -> &[RsPeriod] {
        &self.rs_periods
    }

    pub fn set_market(&mut self, market: MarketType) {
        self.market = market;
    }

    pub fn set_high_price(&mut self, high_price: HighPriceFilter) {
        self.high_price = high_price;
    }

    /// Flip a theme in or out of the selection, keeping insertion order.
    pub fn toggle_theme(&mut self, code: u32) {
        if let Some(pos) = self.themes.iter().position(|c| *c == code) {
            self.themes.remove(pos);
        } else {
            self.themes.push(code);
        }
    }

    pub fn set_themes(&mut self, codes: impl IntoIterator<Item = u32>) {
        self.themes.clear();
        for code in codes {
            if !self.themes.contains(&code) {
                self.themes.push(code);
            }
        }
    }

    /// Zero is treated as "no threshold".
    pub fn set_min_trading_value(&mut self, value: Option<u64>) {
        self.min_trading_value = value.filter(|v| *v > 0);
    }

    /// Replace all periods at once (used by the CLI), then normalize.
    pub fn set_periods(&mut self, periods: Vec<RsPeriod>) -> Result<(), ChartError> {
        if periods.is_empty() {
            return Err(ChartError::Filter("at least one RS period is required".into()));
        }
        for p in &periods {
            check_order(p.start, p.end)?;
        }
        self.rs_periods = periods;
        normalize_periods(&mut self.rs_periods);
        Ok(())
    }

    pub fn add_period(&mut self) {
        self.rs_periods.push(RsPeriod::default());
        normalize_periods(&mut self.rs_periods);
    }

    /// The first period is permanent.
    pub fn remove_period(&mut self, index: usize) -> Result<(), ChartError> {
        if index == 0 {
            return Err(ChartError::Filter("the first RS period cannot be removed".into()));
        }
        if index >= self.rs_periods.len() {
            return Err(ChartError::Filter(format!("no RS period at index {}", index)));
        }
        self.rs_periods.remove(index);
        normalize_periods(&mut self.rs_periods);
        Ok(())
    }

    pub fn set_period_dates(
        &mut self,
        index: usize,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<(), ChartError> {
        check_order(start, end)?;
        let period = self
            .rs_periods
            .get_mut(index)
            .ok_or_else(|| ChartError::Filter(format!("no RS period at index {}", index)))?;
        period.start = start;
        period.end = end;
        Ok(())
    }

    /// Set a period's weight, clamped to 0..=100. The last period's weight is
    /// derived and cannot be set directly.
    pub fn set_period_weight(&mut self, index: usize, weight: i64) -> Result<(), ChartError> {
        let last = self.rs_periods.len() - 1;
        if index > last {
            return Err(ChartError::Filter(format!("no RS period at index {}", index)));
        }
        if index == last {
            return Err(ChartError::Filter(
                "the last RS period's weight is derived from the others".into(),
            ));
        }
        self.rs_periods[index].weight = weight.clamp(0, FULL_WEIGHT as i64) as u32;
        normalize_periods(&mut self.rs_periods);
        Ok(())
    }

    /// Snapshot the draft for the next search.
    pub fn apply(&self) -> AppliedFilter {
        AppliedFilter(self.clone())
    }
}

fn check_order(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), ChartError> {
    match (start, end) {
        (Some(s), Some(e)) if s > e => Err(ChartError::Filter(format!(
            "RS period starts after it ends ({} > {})",
            s, e
        ))),
        _ => Ok(()),
    }
}

// ── Applied snapshot ──────────────────────────────────────────────────────────

/// Filter as it was when the user last searched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedFilter(FilterState);

impl AppliedFilter {
    pub fn state(&self) -> &FilterState {
        &self.0
    }
}

/// Translate an applied filter plus paging into the request body.
pub fn build_request(filter: &AppliedFilter, page: u32, page_size: u32) -> RankingRequest {
    let state = filter.state();

    let sub = RankingFilters {
        is_high_price: state.high_price.as_flag(),
        theme: (!state.themes.is_empty()).then(|| state.themes.clone()),
        min_trading_value: state.min_trading_value,
    };
    let filters = (sub != RankingFilters::default()).then_some(sub);

    let rs: Vec<RsFilter> = state
        .rs_periods
        .iter()
        .filter_map(|p| match (p.start, p.end) {
            (Some(start), Some(end)) => Some(RsFilter {
                rs_start_date: compact_date(start),
                rs_end_date: compact_date(end),
                strength: p.weight,
            }),
            _ => None,
        })
        .collect();
    let rs_filters = (!rs.is_empty()).then_some(rs);

    RankingRequest {
        market_type: state.market,
        page,
        page_size,
        filters,
        rs_filters,
    }
}
