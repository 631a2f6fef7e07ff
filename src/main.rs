mod api;
mod config;
mod detail;
mod error;
mod export;
mod filter;
mod live;
mod models;
mod session;
mod table;
mod utils;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::api::{ChartApi, RestClient, wait_until_ready};
use crate::config::AppConfig;
use crate::detail::{DateRange, DetailView};
use crate::error::ChartError;
use crate::filter::{FilterState, RsPeriod};
use crate::live::LiveFeed;
use crate::models::{CandleType, HighPriceFilter, MarketType, THEME_CODES, theme_by_code};
use crate::session::{FetchOutcome, RankingSession, WatchUpdate};
use crate::table::{Column, ColumnSet, layout, render};

#[derive(Parser)]
#[command(name = "live-chart", about = "Real-time relative-strength stock ranking", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Backend base URL, overrides `api.base_url`
    #[arg(long, global = true, env = "LIVE_CHART_BASE_URL")]
    base_url: Option<String>,
}

/// Search conditions shared by `rank`, `watch` and `export`.
#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// all, kospi or kosdaq
    #[arg(long, default_value = "all")]
    market: MarketType,

    /// all, true (new highs only) or false (exclude new highs)
    #[arg(long, default_value = "all")]
    high_price: HighPriceFilter,

    /// Theme code, repeatable (see `live-chart themes`)
    #[arg(long = "theme")]
    themes: Vec<u32>,

    /// Minimum trading value in KRW
    #[arg(long)]
    min_trading_value: Option<u64>,

    /// RS window as START:END[:WEIGHT] (dates YYYY-MM-DD), repeatable.
    /// The last window's weight is whatever the others leave of 100.
    #[arg(long = "rs", value_parser = parse_rs_period)]
    rs_periods: Vec<RsPeriod>,

    /// Rows per page
    #[arg(long)]
    page_size: Option<u32>,
}

impl FilterArgs {
    fn apply_to(&self, draft: &mut FilterState) -> Result<(), ChartError> {
        draft.set_market(self.market);
        draft.set_high_price(self.high_price);
        if let Some(code) = self.themes.iter().find(|c| theme_by_code(**c).is_none()) {
            return Err(ChartError::Filter(format!(
                "unknown theme code {} (see `live-chart themes`)",
                code
            )));
        }
        draft.set_themes(self.themes.iter().copied());
        draft.set_min_trading_value(self.min_trading_value);
        if !self.rs_periods.is_empty() {
            draft.set_periods(self.rs_periods.clone())?;
        }
        Ok(())
    }
}

fn parse_rs_period(s: &str) -> Result<RsPeriod, String> {
    let parts: Vec<&str> = s.split(':').map(str::trim).collect();
    let date = |v: &str| {
        NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|e| format!("bad date '{}': {}", v, e))
    };
    match parts.as_slice() {
        [start, end] => Ok(RsPeriod::new(Some(date(start)?), Some(date(end)?), 0)),
        [start, end, weight] => {
            let weight = weight
                .parse::<u32>()
                .map_err(|e| format!("bad weight '{}': {}", weight, e))?;
            Ok(RsPeriod::new(Some(date(start)?), Some(date(end)?), weight))
        }
        _ => Err(format!("expected START:END[:WEIGHT], got '{}'", s)),
    }
}

#[derive(Subcommand)]
enum Command {
    /// Search the ranking and print one page
    Rank {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Column id to hide, repeatable
        #[arg(long)]
        hide: Vec<Column>,
    },

    /// Page through the ranking interactively (n, p, g N, s N, r, q)
    Browse {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long)]
        hide: Vec<Column>,
    },

    /// Daily candles for one stock
    Detail {
        /// Stock code, e.g. 005930
        code: String,

        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long)]
        candle_type: Option<CandleType>,
    },

    /// Follow live prices and re-rank whenever the server recomputes
    Watch {
        #[command(flatten)]
        filter: FilterArgs,

        /// Also refetch on a fixed timer
        #[arg(long)]
        interval_secs: Option<u64>,

        #[arg(long)]
        hide: Vec<Column>,
    },

    /// Write the search result to CSV
    Export {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Walk every page instead of just the first
        #[arg(long)]
        all_pages: bool,

        #[arg(long)]
        hide: Vec<Column>,
    },

    /// Show backend readiness
    Status {
        /// Poll until the first computation is done
        #[arg(long)]
        wait: bool,
    },

    /// List theme codes
    Themes,
}

fn columns(hidden: &[Column]) -> ColumnSet {
    let mut set = ColumnSet::default();
    for c in hidden {
        set.hide(*c);
    }
    set
}

fn page_size(config: &AppConfig, requested: Option<u32>) -> Result<u32> {
    let size = requested.unwrap_or(config.table.page_size);
    if !config.is_allowed_page_size(size) {
        bail!("page size {} not offered (choose from {:?})", size, config.table.page_sizes);
    }
    Ok(size)
}

fn open_session(config: &AppConfig, filter: &FilterArgs) -> Result<RankingSession<dyn ChartApi>> {
    let api: Arc<dyn ChartApi> = Arc::new(RestClient::new(&config.api)?);
    let session = RankingSession::new(api, page_size(config, filter.page_size)?);
    session.edit_draft(|draft| filter.apply_to(draft))?;
    Ok(session)
}

/// Read pager commands from `input` until `q` or EOF.
///
/// Bad commands print a hint and the pager keeps going.
async fn browse<A, R, W>(
    session: &RankingSession<A>,
    cols: &ColumnSet,
    config: &AppConfig,
    input: R,
    out: &mut W,
) -> Result<()>
where
    A: ChartApi + ?Sized,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let outcome = match (words.next(), words.next().map(str::parse::<u32>)) {
            (Some("q"), _) => break,
            (Some("n"), _) => session.next_page().await.ok_or("no next page"),
            (Some("p"), _) => session.prev_page().await.ok_or("no previous page"),
            (Some("r"), _) => Ok(session.retry().await),
            (Some("g"), Some(Ok(page))) => match session.set_page(page).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    writeln!(out, "{}", e)?;
                    continue;
                }
            },
            (Some("s"), Some(Ok(size))) if config.is_allowed_page_size(size) => {
                match session.set_page_size(size).await {
                    Ok(outcome) => Ok(outcome),
                    Err(e) => {
                        writeln!(out, "{}", e)?;
                        continue;
                    }
                }
            }
            (Some("s"), _) => {
                writeln!(out, "page sizes: {:?}", config.table.page_sizes)?;
                continue;
            }
            (None, _) => continue,
            _ => {
                writeln!(out, "n next · p prev · g N go to page · s N page size · r retry · q quit")?;
                continue;
            }
        };
        if let Err(why) = outcome {
            let view = session.snapshot();
            writeln!(out, "{} (page {}/{})", why, view.page, view.total_pages().max(1))?;
            continue;
        }
        write!(out, "{}", render(&session.snapshot(), cols))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "live_chart=info,warn",
        1 => "live_chart=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;
    if let Some(url) = cli.base_url {
        config.api.base_url = url;
    }

    match cli.command {
        Command::Rank { filter, page, hide } => {
            let session = open_session(&config, &filter)?;
            let outcome = session.search_at(page).await?;
            print!("{}", render(&session.snapshot(), &columns(&hide)));
            if outcome == FetchOutcome::Failed && session.snapshot().data.is_none() {
                bail!("ranking unavailable");
            }
        }

        Command::Browse { filter, hide } => {
            let cols = columns(&hide);
            let session = open_session(&config, &filter)?;
            session.search().await;
            print!("{}", render(&session.snapshot(), &cols));
            let stdin = BufReader::new(tokio::io::stdin());
            browse(&session, &cols, &config, stdin, &mut std::io::stdout()).await?;
        }

        Command::Detail {
            code,
            from,
            to,
            page,
            candle_type,
        } => {
            let default = DateRange::last_days(config.detail.lookback_days);
            let range = DateRange::new(from.unwrap_or(default.from()), to.unwrap_or(default.to()))?;
            let candle_type = match candle_type {
                Some(t) => t,
                None => config
                    .detail
                    .candle_type
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))?,
            };

            let api: Arc<dyn ChartApi> = Arc::new(RestClient::new(&config.api)?);
            let view = DetailView::new(api, code, candle_type, range, config.detail.page_size);
            if view.load().await == FetchOutcome::Failed {
                warn!("Candle fetch failed, retrying once");
                view.retry().await;
            }
            if page > 1 {
                view.set_page(page)?;
            }
            print!("{}", view.render());
        }

        Command::Watch {
            filter,
            interval_secs,
            hide,
        } => {
            let cols = columns(&hide);
            let session = open_session(&config, &filter)?;
            let feed = LiveFeed::new(&config.api.base_url, config.socket.clone())?;
            let mut sub = feed.subscribe();
            info!("Live feed: {}", feed.url());

            session.search().await;
            print!("{}", render(&session.snapshot(), &cols));

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let interval = interval_secs.filter(|s| *s > 0).map(Duration::from_secs);
            session::watch(&session, sub.events_mut(), interval, &cancel, |update| match update {
                WatchUpdate::Table(view) => print!("\n{}", render(&view, &cols)),
                WatchUpdate::Tick(p) => println!(
                    "  {} {} ({}%)",
                    p.stock_code,
                    utils::fmt_decimal(p.price),
                    p.change_rate.as_deref().unwrap_or("-")
                ),
                WatchUpdate::Connected => info!("Live feed connected"),
                WatchUpdate::Disconnected => warn!("Live feed disconnected, reconnecting"),
                WatchUpdate::FeedClosed => warn!("Live feed closed"),
            })
            .await;

            drop(sub);
            feed.shutdown().await;
            let book = feed.prices();
            info!("{} live prices seen, {} subscribers left", book.len(), feed.subscriber_count());
            if !book.is_empty() {
                let rows: Vec<Vec<String>> = book
                    .snapshot()
                    .iter()
                    .map(|p| {
                        vec![
                            p.stock_code.clone(),
                            utils::fmt_decimal(p.price),
                            p.change_rate.clone().unwrap_or_else(|| "-".into()),
                        ]
                    })
                    .collect();
                let headers = vec!["코드".to_string(), "최근가".to_string(), "등락률".to_string()];
                print!("\n{}", layout(&headers, &rows));
            }
        }

        Command::Export {
            filter,
            out,
            all_pages,
            hide,
        } => {
            let _t = utils::Timer::start("CSV export");
            let session = open_session(&config, &filter)?;
            if session.search().await != FetchOutcome::Applied {
                bail!("ranking unavailable: {}", session.snapshot().error.unwrap_or_default());
            }

            let mut rows = session.snapshot().rows().to_vec();
            if all_pages {
                let total = session.snapshot().total_pages();
                for page in 2..=total {
                    if session.set_page(page).await? != FetchOutcome::Applied {
                        bail!("page {} failed: {}", page, session.snapshot().error.unwrap_or_default());
                    }
                    rows.extend(session.snapshot().rows().iter().cloned());
                }
            }

            let path = out.unwrap_or_else(|| config.export.file_name.clone());
            let written = export::export_to_path(&path, &rows, &columns(&hide).visible())
                .with_context(|| format!("Export to {:?} failed", path))?;
            info!("Done: {} rows → {:?}", utils::fmt_number(written as i64), path);
        }

        Command::Status { wait } => {
            let api = RestClient::new(&config.api)?;
            let status = if wait {
                wait_until_ready(
                    &api,
                    config.api.status_poll_attempts,
                    Duration::from_millis(config.api.status_poll_delay_ms),
                )
                .await?
            } else {
                api.fetch_status().await?
            };
            println!("─────────────────────────────────");
            println!("  Backend : {}", config.api.base_url);
            println!("  Ready   : {}", if status.initialized { "yes" } else { "no" });
            println!("  Updated : {}", status.last_data_update.as_deref().unwrap_or("-"));
            println!("─────────────────────────────────");
        }

        Command::Themes => {
            let headers = vec!["코드".to_string(), "테마".to_string(), "설명".to_string()];
            let rows: Vec<Vec<String>> = THEME_CODES
                .iter()
                .map(|t| vec![t.code.to_string(), t.name.to_string(), t.description.to_string()])
                .collect();
            print!("{}", layout(&headers, &rows));
        }
    }

    Ok(())
}
