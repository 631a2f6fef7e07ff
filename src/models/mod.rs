use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Enumerations ──────────────────────────────────────────────────────────────

/// Market segment tab.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    #[default]
    All,
    Kospi,
    Kosdaq,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Kospi => "kospi",
            Self::Kosdaq => "kosdaq",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "kospi" => Ok(Self::Kospi),
            "kosdaq" => Ok(Self::Kosdaq),
            other => Err(format!("unknown market '{}' (all, kospi, kosdaq)", other)),
        }
    }
}

/// New-high selector. `All` means "no constraint" and is dropped from requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HighPriceFilter {
    #[default]
    All,
    Only,
    Exclude,
}

impl HighPriceFilter {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::All => None,
            Self::Only => Some(true),
            Self::Exclude => Some(false),
        }
    }
}

impl FromStr for HighPriceFilter {
    type Err = String;

    /// Accepts the radio values the dashboard used: `all`, `true`, `false`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "true" | "only" => Ok(Self::Only),
            "false" | "exclude" => Ok(Self::Exclude),
            other => Err(format!("unknown high-price value '{}' (all, true, false)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CandleType {
    #[default]
    Day,
    Week,
    Month,
}

impl CandleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl FromStr for CandleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(format!("unknown candle type '{}' (day, week, month)", other)),
        }
    }
}

// ── Themes ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeInfo {
    pub code: u32,
    pub name: &'static str,
    pub description: &'static str,
}

/// Theme table as assigned by the backend.
pub const THEME_CODES: &[ThemeInfo] = &[
    ThemeInfo {
        code: 100,
        name: "제조업",
        description: "제조업 전반 (제약, 금속, 건설, 자동차, 전자, 화학, 음식료, 섬유, 기계 등)",
    },
    ThemeInfo {
        code: 200,
        name: "서비스업",
        description: "서비스업 전반 (유통, 통신, 에너지, 미디어, 여행, 교육, 의료 등)",
    },
    ThemeInfo {
        code: 300,
        name: "IT/기술",
        description: "IT 및 기술 산업 (소프트웨어, 반도체, 바이오, 게임 등)",
    },
    ThemeInfo {
        code: 400,
        name: "금융",
        description: "금융업 (은행, 증권, 보험 등)",
    },
    ThemeInfo {
        code: 500,
        name: "운송/물류",
        description: "운송 및 물류업 (해운, 항공, 물류 등)",
    },
    ThemeInfo {
        code: 900,
        name: "기타",
        description: "기타 업종",
    },
];

pub fn theme_by_code(code: u32) -> Option<&'static ThemeInfo> {
    THEME_CODES.iter().find(|t| t.code == code)
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Body of `POST /real-time-chart/stocks`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankingRequest {
    pub market_type: MarketType,
    pub page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<RankingFilters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rs_filters: Option<Vec<RsFilter>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankingFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_high_price: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_trading_value: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RsFilter {
    pub rs_start_date: String,
    pub rs_end_date: String,
    pub strength: u32,
}

/// Query of `GET /real-time-chart/stored/{stockCode}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleQuery {
    pub stock_code: String,
    pub candle_type: CandleType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

// ── Raw responses ─────────────────────────────────────────────────────────────

/// Numeric field the backend sends either as a JSON number or as a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NumOrStr {
    Num(f64),
    Str(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRankingResponse {
    #[serde(default)]
    pub market_type: Option<String>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub stocks: Vec<RawRankedRow>,
    #[serde(default)]
    pub meta: Option<RawRankingMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRankedRow {
    pub id: Option<NumOrStr>,
    pub rank: NumOrStr,
    #[serde(default)]
    pub company_name: String,
    pub stock_code: String,
    pub current_price: Option<NumOrStr>,
    #[serde(default)]
    pub exchange: String,
    pub relative_strength_score: Option<NumOrStr>,
    #[serde(default)]
    pub is_high_price: bool,
    pub investment_indicators: Option<String>,
    pub investment_indicators_dtl: Option<String>,
    pub theme: Option<String>,
    pub up_name: Option<String>,
    #[serde(default)]
    pub rank_change3_days: Vec<Option<NumOrStr>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRankingMeta {
    pub last_updated_at: Option<String>,
    pub data_date: Option<DataDate>,
}

/// Date (or date span) the ranking was computed over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DataDate {
    Single(String),
    Range {
        #[serde(alias = "startDate", alias = "from")]
        start: String,
        #[serde(alias = "endDate", alias = "to")]
        end: String,
    },
}

impl fmt::Display for DataDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(d) => write!(f, "{}", d),
            Self::Range { start, end } => write!(f, "{} ~ {}", start, end),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChartResponse {
    pub stock_code: String,
    #[serde(default)]
    pub candle_type: Option<String>,
    #[serde(default)]
    pub candles: Vec<RawCandle>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCandle {
    pub time: String,
    pub open: NumOrStr,
    pub high: NumOrStr,
    pub low: NumOrStr,
    pub close: NumOrStr,
    pub volume: NumOrStr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub initialized: bool,
    pub last_data_update: Option<String>,
}

// ── Socket payloads ───────────────────────────────────────────────────────────

/// `priceUpdated` event body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdated {
    pub stock_code: String,
    pub price: NumOrStr,
    #[serde(default)]
    pub change_rate: Option<NumOrStr>,
    #[serde(default)]
    pub prev_day_compare: Option<NumOrStr>,
}

/// `metricsUpdated` event body. Only used as a refresh hint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsUpdated {
    #[serde(default)]
    pub trade_date: Option<String>,
    #[serde(default)]
    pub filtered_count: Option<u64>,
}

// ── Normalized domain types ───────────────────────────────────────────────────

/// Rank on each of the last three trading days, most recent first (D-1, D-2, D-3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankHistory(pub [Option<i64>; 3]);

#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    pub id: String,
    pub code: String,
    pub rank: i64,
    pub company_name: String,
    pub current_price: Option<f64>,
    pub exchange: String,
    pub rs_score: Option<f64>,
    pub is_high_price: bool,
    pub indicators: Option<String>,
    pub indicators_detail: Option<String>,
    pub theme: Option<String>,
    pub industry: Option<String>,
    pub rank_history: RankHistory,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingMeta {
    pub last_updated_at: Option<String>,
    pub data_date: Option<DataDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingPage {
    pub market_type: MarketType,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u32,
    pub rows: Vec<RankedRow>,
    pub meta: RankingMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartDetail {
    pub stock_code: String,
    pub candle_type: CandleType,
    pub candles: Vec<Candle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LivePrice {
    pub stock_code: String,
    pub price: f64,
    pub change_rate: Option<String>,
    pub prev_day_compare: Option<String>,
}
