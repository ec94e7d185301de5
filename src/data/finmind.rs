//! Primary market data client (FinMind REST API).
//!
//! Every request passes through the rate limiter and the retry policy.
//! Each failed attempt, retried or terminal, is appended to a sanitized
//! error log (the auth token never reaches the log) with its status and
//! attempt index; the final failure surfaces as [`SourceError`].

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::industry;
use super::{
    ApiErrorEntry, CompanyRecord, IndexBar, MarketDataSource, PriceBar, RateLimiter, RetryPolicy,
    SourceError, Venue,
};
use crate::config::ApiConfig;

pub const DEFAULT_BASE_URL: &str = "https://api.finmindtrade.com/api/v4/data";

const DATASET_STOCK_INFO: &str = "TaiwanStockInfo";
const DATASET_STOCK_PRICE: &str = "TaiwanStockPrice";
const DATASET_TOTAL_RETURN_INDEX: &str = "TaiwanStockTotalReturnIndex";
const BENCHMARK_ID: &str = "TAIEX";

/// Columns the price dataset must carry; anything less means the upstream
/// changed shape and the payload is unusable.
const REQUIRED_PRICE_COLUMNS: &[&str] = &[
    "date",
    "stock_id",
    "open",
    "max",
    "min",
    "close",
    "Trading_Volume",
];

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
}

/// Rate-limited client for the quota-bound primary API.
pub struct FinMindClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
    error_log: Mutex<Vec<ApiErrorEntry>>,
}

impl FinMindClient {
    pub fn new(config: &ApiConfig, retry: RetryPolicy) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            rate_limiter: RateLimiter::new(config.calls_per_hour),
            retry,
            error_log: Mutex::new(Vec::new()),
        })
    }

    /// Hourly quota usage.
    pub async fn rate_stats(&self) -> super::RateLimiterStats {
        self.rate_limiter.stats().await
    }

    /// Terminal failures recorded so far.
    pub fn error_log(&self) -> Vec<ApiErrorEntry> {
        self.error_log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record_error(
        &self,
        operation: &str,
        message: String,
        status: Option<u16>,
        attempt: u32,
        params: &[(String, String)],
    ) {
        let sanitized: Vec<(String, String)> = params
            .iter()
            .filter(|(k, _)| k != "token")
            .cloned()
            .collect();
        if let Ok(mut log) = self.error_log.lock() {
            log.push(ApiErrorEntry {
                timestamp: Utc::now(),
                source: "finmind".to_string(),
                operation: operation.to_string(),
                message,
                status,
                attempt,
                params: sanitized,
            });
        }
    }

    /// Issue one dataset request, honoring the rate limit and retrying per
    /// policy. Returns the raw data rows.
    async fn call_api(
        &self,
        operation: &str,
        params: Vec<(String, String)>,
    ) -> Result<Vec<Value>, SourceError> {
        let mut query = params.clone();
        if !self.token.is_empty() {
            query.push(("token".to_string(), self.token.clone()));
        }

        let mut attempt: u32 = 0;
        loop {
            self.rate_limiter.acquire().await;

            let response = self.http.get(&self.base_url).query(&query).send().await;
            let (status, failure): (Option<u16>, String) = match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if status == 200 {
                        let envelope: Envelope = match resp.json().await {
                            Ok(env) => env,
                            Err(e) => {
                                let err = SourceError::Parse(e.to_string());
                                self.record_error(
                                    operation,
                                    err.to_string(),
                                    Some(status),
                                    attempt,
                                    &params,
                                );
                                return Err(err);
                            }
                        };
                        // The API reports its own errors inside the envelope
                        if let Some(s) = envelope.status {
                            if s != 200 {
                                let err = SourceError::Http {
                                    status: s as u16,
                                    message: envelope.msg.unwrap_or_default(),
                                };
                                self.record_error(
                                    operation,
                                    err.to_string(),
                                    Some(s as u16),
                                    attempt,
                                    &params,
                                );
                                return Err(err);
                            }
                        }
                        debug!(operation, rows = envelope.data.len(), "API call succeeded");
                        return Ok(envelope.data);
                    }
                    (Some(status), format!("HTTP {}", status))
                }
                Err(e) => (None, e.to_string()),
            };

            // Every failed attempt lands in the log, retried or not
            self.record_error(operation, failure.clone(), status, attempt, &params);

            if self.retry.should_retry(attempt, status) {
                let wait = self.retry.wait_time(attempt);
                warn!(
                    operation,
                    attempt,
                    status = ?status,
                    wait_secs = wait.as_secs(),
                    "API call failed, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }

            let err = match status {
                Some(s) if attempt == 0 => SourceError::Http {
                    status: s,
                    message: failure,
                },
                _ => SourceError::Exhausted {
                    status,
                    attempts: attempt + 1,
                },
            };
            return Err(err);
        }
    }
}

// ============================================================================
// Row Normalization
// ============================================================================

fn value_str(row: &Value, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn value_f64(row: &Value, key: &str) -> Option<f64> {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn value_date(row: &Value, key: &str) -> Option<NaiveDate> {
    value_str(row, key).and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

/// Leveraged and inverse ETFs: a leading zero followed by at least three
/// more digits.
fn is_special_etf(stock_id: &str) -> bool {
    let bytes = stock_id.as_bytes();
    bytes.len() >= 4 && bytes[0] == b'0' && bytes[1..4].iter().all(u8::is_ascii_digit)
}

/// Ordinary security ids are four to six digits.
fn is_security_id(stock_id: &str) -> bool {
    (4..=6).contains(&stock_id.len()) && stock_id.bytes().all(|b| b.is_ascii_digit())
}

/// Apply the company-list filter chain and collapse duplicate symbols.
fn normalize_company_rows(rows: &[Value]) -> Vec<CompanyRecord> {
    struct Candidate {
        stock_id: String,
        stock_name: String,
        venue: Venue,
        category: Option<String>,
        freshness: Option<NaiveDate>,
    }

    let mut candidates = Vec::new();
    for row in rows {
        let venue = match value_str(row, "type").as_deref().and_then(Venue::parse) {
            Some(v) => v,
            None => continue,
        };
        let stock_id = match value_str(row, "stock_id") {
            Some(id) if !id.is_empty() => id,
            _ => continue,
        };
        if is_special_etf(&stock_id) {
            continue;
        }
        let category = value_str(row, "industry_category");
        if let Some(cat) = category.as_deref() {
            if industry::NON_INDUSTRY_TAGS.contains(&cat) {
                continue;
            }
        }
        if !is_security_id(&stock_id) {
            continue;
        }
        candidates.push(Candidate {
            stock_id,
            stock_name: value_str(row, "stock_name").unwrap_or_default(),
            venue,
            category,
            freshness: value_date(row, "date"),
        });
    }

    // Delisted heuristic: rows that stopped receiving updates trail the
    // newest freshness date in the payload. Known to false-positive on
    // lazily updated sources.
    if let Some(max_date) = candidates.iter().filter_map(|c| c.freshness).max() {
        let before = candidates.len();
        candidates.retain(|c| c.freshness.map_or(true, |d| d == max_date));
        if candidates.len() < before {
            debug!(
                dropped = before - candidates.len(),
                "Dropped stale company rows"
            );
        }
    }

    // Collapse duplicates, first occurrence fixing name and venue, all
    // industry tags pooled for the priority merge.
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, (String, Venue, Vec<String>)> = HashMap::new();
    for c in candidates {
        let entry = grouped.entry(c.stock_id.clone()).or_insert_with(|| {
            order.push(c.stock_id.clone());
            (c.stock_name.clone(), c.venue, Vec::new())
        });
        if let Some(cat) = c.category {
            entry.2.push(cat);
        }
    }

    order
        .into_iter()
        .filter_map(|id| {
            grouped.remove(&id).map(|(name, venue, tags)| {
                let (first, second) = industry::merge_categories(&tags);
                CompanyRecord {
                    stock_id: id,
                    stock_name: name,
                    industry_category: first,
                    industry_category2: second,
                    venue,
                }
            })
        })
        .collect()
}

/// Normalize raw price rows, renaming `max`/`min`/`Trading_Volume`.
///
/// A missing required column means the payload shape changed; the result is
/// empty and the caller warns rather than errors.
fn normalize_price_rows(rows: &[Value], symbols: &[String]) -> Option<Vec<PriceBar>> {
    let first = match rows.first() {
        Some(f) => f,
        None => return Some(Vec::new()),
    };
    if REQUIRED_PRICE_COLUMNS.iter().any(|k| first.get(k).is_none()) {
        return None;
    }

    let scope: Option<std::collections::HashSet<&str>> = if symbols.is_empty() {
        None
    } else {
        Some(symbols.iter().map(String::as_str).collect())
    };

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let stock_id = match value_str(row, "stock_id") {
            Some(id) => id,
            None => continue,
        };
        if let Some(scope) = &scope {
            if !scope.contains(stock_id.as_str()) {
                continue;
            }
        }
        let date = match value_date(row, "date") {
            Some(d) => d,
            None => continue,
        };
        bars.push(PriceBar {
            stock_id,
            date,
            open: value_f64(row, "open"),
            high: value_f64(row, "max"),
            low: value_f64(row, "min"),
            close: value_f64(row, "close"),
            volume: value_f64(row, "Trading_Volume"),
        });
    }
    Some(bars)
}

/// Normalize index rows to `{date, level}`; the level arrives as `price`
/// from the total-return dataset and `close` from the plain price dataset.
fn normalize_index_rows(rows: &[Value], benchmark_only: bool) -> Vec<IndexBar> {
    rows.iter()
        .filter_map(|row| {
            if benchmark_only {
                match value_str(row, "stock_id") {
                    Some(id) if id == BENCHMARK_ID => {}
                    _ => return None,
                }
            }
            let date = value_date(row, "date")?;
            let level = value_f64(row, "price").or_else(|| value_f64(row, "close"))?;
            Some(IndexBar { date, level })
        })
        .collect()
}

/// Put a possibly reversed date range in order.
fn order_range(start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate, bool) {
    if start > end {
        (end, start, true)
    } else {
        (start, end, false)
    }
}

fn date_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

// ============================================================================
// MarketDataSource
// ============================================================================

#[async_trait]
impl MarketDataSource for FinMindClient {
    fn name(&self) -> &'static str {
        "finmind"
    }

    async fn fetch_company_list(&self) -> Result<Vec<CompanyRecord>, SourceError> {
        let rows = self
            .call_api(
                "company_list",
                vec![("dataset".to_string(), DATASET_STOCK_INFO.to_string())],
            )
            .await?;
        let records = normalize_company_rows(&rows);
        debug!(
            raw = rows.len(),
            companies = records.len(),
            "Company list normalized"
        );
        Ok(records)
    }

    async fn fetch_prices(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        symbols: &[String],
        _venues: &HashMap<String, Venue>,
    ) -> Result<Vec<PriceBar>, SourceError> {
        let (start, end, swapped) = order_range(start, end);
        if swapped {
            warn!(start = %start, end = %end, "Price range was reversed, swapping");
        }

        let rows = self
            .call_api(
                "prices",
                vec![
                    ("dataset".to_string(), DATASET_STOCK_PRICE.to_string()),
                    ("start_date".to_string(), date_str(start)),
                    ("end_date".to_string(), date_str(end)),
                ],
            )
            .await?;

        match normalize_price_rows(&rows, symbols) {
            Some(bars) => Ok(bars),
            None => {
                warn!("Price payload missing required columns, returning empty");
                Ok(Vec::new())
            }
        }
    }

    async fn fetch_index(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IndexBar>, SourceError> {
        let (start, end, _) = order_range(start, end);

        let rows = self
            .call_api(
                "index",
                vec![
                    ("dataset".to_string(), DATASET_TOTAL_RETURN_INDEX.to_string()),
                    ("start_date".to_string(), date_str(start)),
                    ("end_date".to_string(), date_str(end)),
                ],
            )
            .await?;
        let bars = normalize_index_rows(&rows, true);
        if !bars.is_empty() {
            return Ok(bars);
        }

        warn!("Total-return index empty, falling back to plain price dataset");
        let rows = self
            .call_api(
                "index_fallback",
                vec![
                    ("dataset".to_string(), DATASET_STOCK_PRICE.to_string()),
                    ("data_id".to_string(), BENCHMARK_ID.to_string()),
                    ("start_date".to_string(), date_str(start)),
                    ("end_date".to_string(), date_str(end)),
                ],
            )
            .await?;
        Ok(normalize_index_rows(&rows, false))
    }

    fn drain_errors(&self) -> Vec<ApiErrorEntry> {
        self.error_log
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default()
    }
}
