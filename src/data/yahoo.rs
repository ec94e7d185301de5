//! Secondary market data client (free bulk source).
//!
//! Company discovery scrapes the exchange ISIN directory pages; prices come
//! from the public chart endpoint in adaptively sized batches with
//! venue-suffixed tickers (`.TW` listed, `.TWO` OTC).

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::{
    AdaptiveBatchDownloader, CompanyRecord, DownloaderConfig, IndexBar, MarketDataSource,
    PriceBar, SourceError, Venue,
};

const TWSE_DIRECTORY_URL: &str = "https://isin.twse.com.tw/isin/C_public.jsp?strMode=2";
const TPEX_DIRECTORY_URL: &str = "https://isin.twse.com.tw/isin/C_public.jsp?strMode=4";
const CHART_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const BENCHMARK_TICKER: &str = "^TWII";

/// The directory row's first cell is `code + wide space + name`.
const WIDE_SPACE: char = '\u{3000}';

static ROW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("valid row regex"));
static CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").expect("valid cell regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// Free bulk client with adaptive batch pacing.
pub struct YahooClient {
    http: reqwest::Client,
    downloader: AdaptiveBatchDownloader,
    max_retries: u32,
}

impl YahooClient {
    pub fn new(downloader: DownloaderConfig, max_retries: u32) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36")
            .build()?;
        Ok(Self {
            http,
            downloader: AdaptiveBatchDownloader::new(downloader),
            max_retries,
        })
    }

    /// Current downloader control state.
    pub fn downloader_stats(&self) -> super::downloader::DownloaderStats {
        self.downloader.stats()
    }

    async fn fetch_directory(&self, url: &str, venue: Venue) -> Option<Vec<CompanyRecord>> {
        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(venue = %venue, error = %e, "Directory page fetch failed");
                return None;
            }
        };
        match response.text().await {
            Ok(html) => Some(parse_directory_page(&html, venue)),
            Err(e) => {
                warn!(venue = %venue, error = %e, "Directory page body unreadable");
                None
            }
        }
    }

    /// Fetch one batch of tickers, failing the whole batch on transport
    /// trouble. Symbols the source simply has no data for are skipped; an
    /// empty result is a valid outcome (delisted symbols).
    async fn fetch_batch(
        &self,
        batch: &[String],
        venues: &HashMap<String, Venue>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, SourceError> {
        let mut bars = Vec::new();
        for symbol in batch {
            let venue = venues.get(symbol).copied().unwrap_or(Venue::Twse);
            let ticker = to_yahoo_symbol(symbol, venue);
            match self.fetch_chart(&ticker, start, end).await? {
                Some(rows) => bars.extend(rows),
                None => debug!(symbol = %symbol, "No chart data, skipping"),
            }
        }
        Ok(bars)
    }

    async fn fetch_batch_with_retry(
        &self,
        batch: &[String],
        venues: &HashMap<String, Venue>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, SourceError> {
        let mut attempt: u32 = 0;
        loop {
            match self.fetch_batch(batch, venues, start, end).await {
                Ok(bars) => return Ok(bars),
                Err(e) if attempt + 1 < self.max_retries => {
                    let wait = self.downloader.interval_secs() * (attempt + 1) as f64;
                    warn!(
                        attempt,
                        wait_secs = wait,
                        error = %e,
                        "Batch failed, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs_f64(wait)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One chart request. `Ok(None)` means the source has nothing for this
    /// ticker, which is not an error.
    async fn fetch_chart(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Vec<PriceBar>>, SourceError> {
        let period1 = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        // Chart range end is exclusive
        let period2 = (end + ChronoDuration::days(1))
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp();

        let url = format!("{}/{}", CHART_BASE_URL, ticker);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if status != 200 {
            return Err(SourceError::Http {
                status,
                message: format!("chart request for {}", ticker),
            });
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;
        Ok(parse_chart(body, from_yahoo_symbol(ticker)))
    }
}

// ============================================================================
// Symbol Conversion
// ============================================================================

/// Venue-suffixed ticker for the chart endpoint.
pub fn to_yahoo_symbol(stock_id: &str, venue: Venue) -> String {
    format!("{}{}", stock_id, venue.ticker_suffix())
}

/// Strip the venue suffix; `.TWO` must be tested before `.TW` or OTC
/// tickers come back with a trailing `O`.
pub fn from_yahoo_symbol(ticker: &str) -> &str {
    ticker
        .strip_suffix(".TWO")
        .or_else(|| ticker.strip_suffix(".TW"))
        .unwrap_or(ticker)
}

// ============================================================================
// Directory Parsing
// ============================================================================

fn strip_html(fragment: &str) -> String {
    TAG_RE
        .replace_all(fragment, "")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

fn is_screener_code(code: &str) -> bool {
    code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit()) && !code.starts_with("00")
}

/// Extract company rows from one ISIN directory page.
pub fn parse_directory_page(html: &str, venue: Venue) -> Vec<CompanyRecord> {
    let mut records = Vec::new();
    for row in ROW_RE.captures_iter(html) {
        let cells: Vec<String> = CELL_RE
            .captures_iter(&row[1])
            .map(|c| strip_html(&c[1]))
            .collect();
        let first = match cells.first() {
            Some(c) => c,
            None => continue,
        };
        let (code, name) = match first.split_once(WIDE_SPACE) {
            Some((c, n)) => (c.trim(), n.trim()),
            None => continue,
        };
        if !is_screener_code(code) {
            continue;
        }
        let category = cells
            .get(4)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .unwrap_or("-");
        records.push(CompanyRecord {
            stock_id: code.to_string(),
            stock_name: name.to_string(),
            industry_category: category.to_string(),
            industry_category2: "-".to_string(),
            venue,
        });
    }
    records
}

// ============================================================================
// Chart Parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn series_at(series: &[Option<f64>], idx: usize) -> Option<f64> {
    series.get(idx).copied().flatten()
}

fn parse_chart(body: ChartResponse, stock_id: &str) -> Option<Vec<PriceBar>> {
    if body.chart.error.is_some() {
        return None;
    }
    let result = body.chart.result?.into_iter().next()?;
    let quote = result.indicators.quote.into_iter().next()?;

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let date = match chrono::DateTime::from_timestamp(*ts, 0) {
            Some(dt) => dt.date_naive(),
            None => continue,
        };
        bars.push(PriceBar {
            stock_id: stock_id.to_string(),
            date,
            open: series_at(&quote.open, i),
            high: series_at(&quote.high, i),
            low: series_at(&quote.low, i),
            close: series_at(&quote.close, i),
            volume: series_at(&quote.volume, i),
        });
    }
    Some(bars)
}

// ============================================================================
// MarketDataSource
// ============================================================================

#[async_trait]
impl MarketDataSource for YahooClient {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    /// Scrape both venue directories. A failed page contributes zero rows
    /// but never aborts the other venue.
    async fn fetch_company_list(&self) -> Result<Vec<CompanyRecord>, SourceError> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for (url, venue) in [
            (TWSE_DIRECTORY_URL, Venue::Twse),
            (TPEX_DIRECTORY_URL, Venue::Tpex),
        ] {
            if let Some(page) = self.fetch_directory(url, venue).await {
                debug!(venue = %venue, companies = page.len(), "Directory page parsed");
                for record in page {
                    if seen.insert(record.stock_id.clone()) {
                        records.push(record);
                    }
                }
            }
        }
        Ok(records)
    }

    async fn fetch_prices(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        symbols: &[String],
        venues: &HashMap<String, Venue>,
    ) -> Result<Vec<PriceBar>, SourceError> {
        let mut all = Vec::new();
        let mut idx = 0;
        while idx < symbols.len() {
            let size = self.downloader.batch_size().max(1);
            let end_idx = (idx + size).min(symbols.len());
            let batch = &symbols[idx..end_idx];

            match self.fetch_batch_with_retry(batch, venues, start, end).await {
                Ok(bars) => {
                    // An empty batch is a success; the symbols may simply
                    // have no data anymore
                    debug!(batch_len = batch.len(), rows = bars.len(), "Batch done");
                    self.downloader.record(true);
                    all.extend(bars);
                }
                Err(e) => {
                    warn!(batch_len = batch.len(), error = %e, "Batch abandoned");
                    self.downloader.record(false);
                }
            }

            idx = end_idx;
            if idx < symbols.len() {
                tokio::time::sleep(self.downloader.pacing_delay()).await;
            }
        }
        Ok(all)
    }

    async fn fetch_index(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IndexBar>, SourceError> {
        let mut attempt: u32 = 0;
        loop {
            match self.fetch_chart(BENCHMARK_TICKER, start, end).await {
                Ok(bars) => {
                    return Ok(bars
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|b| {
                            b.close.map(|level| IndexBar {
                                date: b.date,
                                level,
                            })
                        })
                        .collect());
                }
                Err(e) if attempt + 1 < self.max_retries => {
                    let wait = self.downloader.interval_secs() * (attempt + 1) as f64;
                    warn!(attempt, error = %e, "Index fetch failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs_f64(wait)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
