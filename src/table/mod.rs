//! Ranking table: column model, cell values, and plain-text rendering.

use crate::error::ChartError;
use crate::models::RankedRow;
use crate::session::TableView;
use crate::utils::{fmt_decimal, fmt_number};
use std::str::FromStr;
use unicode_width::UnicodeWidthStr;

pub const HIGH_PRICE_BADGE: &str = "신고가";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Rank,
    Company,
    Price,
    Exchange,
    RsScore,
    HighPrice,
    Indicators,
    Theme,
    RankHistory,
}

impl Column {
    pub const ALL: [Column; 9] = [
        Column::Rank,
        Column::Company,
        Column::Price,
        Column::Exchange,
        Column::RsScore,
        Column::HighPrice,
        Column::Indicators,
        Column::Theme,
        Column::RankHistory,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Column::Rank => "rank",
            Column::Company => "company",
            Column::Price => "price",
            Column::Exchange => "exchange",
            Column::RsScore => "rs_score",
            Column::HighPrice => "high_price",
            Column::Indicators => "indicators",
            Column::Theme => "theme",
            Column::RankHistory => "rank_history",
        }
    }

    pub fn header(&self) -> &'static str {
        match self {
            Column::Rank => "순위",
            Column::Company => "기업",
            Column::Price => "현재가",
            Column::Exchange => "거래소",
            Column::RsScore => "시장대비강도 점수",
            Column::HighPrice => "신고가 여부",
            Column::Indicators => "투자 중요지표",
            Column::Theme => "테마",
            Column::RankHistory => "최근 3일 순위 (D-1/D-2/D-3)",
        }
    }

    fn right_aligned(&self) -> bool {
        matches!(self, Column::Rank | Column::Price | Column::RsScore)
    }
}

impl FromStr for Column {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase().replace('-', "_");
        Column::ALL
            .into_iter()
            .find(|c| c.id() == s)
            .ok_or_else(|| {
                let ids: Vec<&str> = Column::ALL.iter().map(|c| c.id()).collect();
                ChartError::Filter(format!("unknown column '{}' ({})", s, ids.join(", ")))
            })
    }
}

/// Which columns are shown, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    hidden: Vec<Column>,
}

impl ColumnSet {
    pub fn hide(&mut self, column: Column) {
        if !self.hidden.contains(&column) {
            self.hidden.push(column);
        }
    }

    pub fn show(&mut self, column: Column) {
        self.hidden.retain(|c| *c != column);
    }

    pub fn is_visible(&self, column: Column) -> bool {
        !self.hidden.contains(&column)
    }

    pub fn visible(&self) -> Vec<Column> {
        Column::ALL.into_iter().filter(|c| self.is_visible(*c)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Num(f64),
    Text(String),
    Empty,
}

impl Cell {
    /// Screen text; missing values show as `-`.
    pub fn display(&self) -> String {
        match self {
            Cell::Int(n) => fmt_number(*n),
            Cell::Num(x) => fmt_decimal(*x),
            Cell::Text(s) => s.clone(),
            Cell::Empty => "-".to_string(),
        }
    }
}

fn opt_text(s: &Option<String>) -> Cell {
    match s.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => Cell::Text(t.to_string()),
        _ => Cell::Empty,
    }
}

pub fn cell(row: &RankedRow, column: Column) -> Cell {
    match column {
        Column::Rank => Cell::Int(row.rank),
        Column::Company => Cell::Text(row.company_name.clone()),
        Column::Price => row.current_price.map(Cell::Num).unwrap_or(Cell::Empty),
        Column::Exchange => Cell::Text(row.exchange.clone()),
        Column::RsScore => row.rs_score.map(Cell::Num).unwrap_or(Cell::Empty),
        Column::HighPrice => Cell::Text(if row.is_high_price { HIGH_PRICE_BADGE } else { "-" }.into()),
        Column::Indicators => {
            let parts: Vec<&str> = [&row.indicators, &row.indicators_detail]
                .into_iter()
                .filter_map(|s| s.as_deref().map(str::trim))
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                Cell::Empty
            } else {
                Cell::Text(parts.join(" / "))
            }
        }
        Column::Theme => opt_text(&row.theme),
        Column::RankHistory => Cell::Text(
            row.rank_history
                .0
                .iter()
                .map(|r| r.map(|n| n.to_string()).unwrap_or_else(|| "-".into()))
                .collect::<Vec<_>>()
                .join(" / "),
        ),
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

fn pad(text: &str, width: usize, right: bool) -> String {
    let fill = " ".repeat(width.saturating_sub(text.width()));
    if right {
        format!("{}{}", fill, text)
    } else {
        format!("{}{}", text, fill)
    }
}

fn layout_aligned(headers: &[String], rows: &[Vec<String>], right: &[bool]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();
    for row in rows {
        for (w, v) in widths.iter_mut().zip(row) {
            *w = (*w).max(v.width());
        }
    }

    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (c, w))| pad(c, *w, right.get(i).copied().unwrap_or(false)))
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = line(headers);
    let rule: usize = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    out.push_str(&"─".repeat(rule));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.as_slice()));
    }
    out
}

/// Left-aligned text grid sized by display width (Hangul counts double).
pub fn layout(headers: &[String], rows: &[Vec<String>]) -> String {
    layout_aligned(headers, rows, &[])
}

fn summary(view: &TableView) -> String {
    let period = view
        .data_date()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "- ~ -".into());
    let updated = view.last_updated_at().unwrap_or("-");
    format!(
        "조회기간: {} ({} 업데이트)  전체 {}건  page {}/{}\n",
        period,
        updated,
        fmt_number(view.total_count() as i64),
        view.page,
        view.total_pages().max(1)
    )
}

/// The table as shown on the terminal: summary, grid, then an error banner
/// if the last fetch failed.
pub fn render(view: &TableView, columns: &ColumnSet) -> String {
    let visible = columns.visible();
    let headers: Vec<String> = visible.iter().map(|c| c.header().to_string()).collect();
    let right: Vec<bool> = visible.iter().map(|c| c.right_aligned()).collect();
    let rows: Vec<Vec<String>> = view
        .rows()
        .iter()
        .map(|r| visible.iter().map(|c| cell(r, *c).display()).collect())
        .collect();

    let mut out = summary(view);
    if view.loading && view.data.is_none() {
        out.push_str("불러오는 중...\n");
    } else if rows.is_empty() {
        out.push_str("조건에 맞는 종목이 없습니다.\n");
    } else {
        out.push_str(&layout_aligned(&headers, &rows, &right));
    }
    if let Some(err) = &view.error {
        out.push_str(&format!(
            "! 데이터를 불러오지 못했습니다: {} (showing last good page, retry to reload)\n",
            err
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::row;
    use crate::filter::AppliedFilter;
    use crate::models::{DataDate, MarketType, RankHistory, RankingMeta, RankingPage};

    fn view(rows: Vec<RankedRow>, error: Option<&str>) -> TableView {
        TableView {
            applied: AppliedFilter::default(),
            page: 1,
            page_size: 10,
            data: Some(RankingPage {
                market_type: MarketType::All,
                page: 1,
                page_size: 10,
                total_count: rows.len() as u64,
                total_pages: 1,
                rows,
                meta: RankingMeta {
                    last_updated_at: Some("2024-05-01 15:30:00".into()),
                    data_date: Some(DataDate::Single("2024-05-01".into())),
                },
            }),
            error: error.map(String::from),
            loading: false,
        }
    }

    #[test]
    fn test_column_ids_parse() {
        assert_eq!("rs-score".parse::<Column>().unwrap(), Column::RsScore);
        assert_eq!("THEME".parse::<Column>().unwrap(), Column::Theme);
        assert!("volume".parse::<Column>().is_err());
    }

    #[test]
    fn test_column_set_visibility() {
        let mut set = ColumnSet::default();
        assert_eq!(set.visible().len(), 9);
        set.hide(Column::Indicators);
        set.hide(Column::Indicators);
        assert_eq!(set.visible().len(), 8);
        assert!(!set.is_visible(Column::Indicators));
        set.show(Column::Indicators);
        assert_eq!(set.visible(), Column::ALL.to_vec());
    }

    #[test]
    fn test_cells() {
        let mut r = row("005930", 2);
        r.indicators_detail = Some("ROE 12%".into());
        r.rank_history = RankHistory([Some(5), None, Some(2)]);
        r.current_price = None;

        assert_eq!(cell(&r, Column::Rank), Cell::Int(2));
        assert_eq!(cell(&r, Column::Price), Cell::Empty);
        assert_eq!(cell(&r, Column::HighPrice), Cell::Text(HIGH_PRICE_BADGE.into()));
        assert_eq!(cell(&r, Column::Indicators), Cell::Text("PER 10 / ROE 12%".into()));
        assert_eq!(cell(&r, Column::RankHistory), Cell::Text("5 / - / 2".into()));

        r.is_high_price = false;
        r.theme = Some("  ".into());
        assert_eq!(cell(&r, Column::HighPrice), Cell::Text("-".into()));
        assert_eq!(cell(&r, Column::Theme), Cell::Empty);
    }

    #[test]
    fn test_rank_history_reads_most_recent_first() {
        let mut r = row("005930", 1);
        r.rank_history = RankHistory([Some(3), Some(7), None]);
        let header = Column::RankHistory.header();
        assert!(header.contains("D-1/D-2/D-3"));
        assert_eq!(cell(&r, Column::RankHistory), Cell::Text("3 / 7 / -".into()));

        let out = render(&view(vec![r], None), &ColumnSet::default());
        assert!(out.contains(header));
        assert!(out.contains("3 / 7 / -"));
    }

    #[test]
    fn test_layout_pads_by_display_width() {
        let out = layout(
            &["기업".to_string(), "x".to_string()],
            &[vec!["A".to_string(), "1".to_string()]],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "기업  x");
        assert_eq!(lines[2], "A     1");
    }

    #[test]
    fn test_render_summary_rows_and_hidden_columns() {
        let mut cols = ColumnSet::default();
        cols.hide(Column::Indicators);
        let out = render(&view(vec![row("005930", 1), row("000660", 2)], None), &cols);

        assert!(out.contains("조회기간: 2024-05-01 (2024-05-01 15:30:00 업데이트)"));
        assert!(out.contains("전체 2건"));
        assert!(out.contains("Company 005930"));
        assert!(out.contains("10,001"));
        assert!(!out.contains("투자 중요지표"));
        assert!(!out.contains("데이터를 불러오지 못했습니다"));
    }

    #[test]
    fn test_render_error_banner_keeps_rows() {
        let out = render(&view(vec![row("005930", 1)], Some("HTTP 502")), &ColumnSet::default());
        assert!(out.contains("Company 005930"));
        assert!(out.contains("데이터를 불러오지 못했습니다: HTTP 502"));
    }

    #[test]
    fn test_render_empty_result() {
        let out = render(&view(Vec::new(), None), &ColumnSet::default());
        assert!(out.contains("조건에 맞는 종목이 없습니다"));
    }
}
