//! The daily screen.
//!
//! Fetch the day's prices and index level, persist them, run both screens
//! over a year of stored history, and hand ranked report rows to the
//! exporter layer.

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use std::sync::Arc;
use tracing::{info, warn};

use super::calendar::TradingCalendar;
use crate::calc::{market_return, BloomFilter, VcpFilter};
use crate::data::{
    ApiErrorEntry, FallbackEvent, HybridClient, MarketDataSource, Storage,
};
use crate::report::{self, BloomReportRow, VcpReportRow};

/// Calendar days of history loaded for the rolling windows.
const HISTORY_DAYS: i64 = 365;
/// Benchmark return horizon in trading rows.
const MARKET_LOOKBACK: usize = 20;

pub const VCP_KIND: &str = "vcp";
pub const BLOOM_KIND: &str = "bloom";

/// Outcome summary of one daily run.
#[derive(Debug, Default)]
pub struct DailyReport {
    pub date: Option<NaiveDate>,
    pub skipped: bool,
    pub price_count: usize,
    pub index_count: usize,
    pub vcp: Vec<VcpReportRow>,
    pub bloom: Vec<BloomReportRow>,
    pub errors: Vec<String>,
    pub fallback_events: Vec<FallbackEvent>,
    pub api_errors: Vec<ApiErrorEntry>,
}

impl std::fmt::Display for DailyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.skipped {
            return write!(f, "Daily screen skipped (non-trading day)");
        }
        write!(
            f,
            "Daily screen {}: {} prices, {} index rows, {} VCP, {} bloom, {} errors",
            self.date.map(|d| d.to_string()).unwrap_or_default(),
            self.price_count,
            self.index_count,
            self.vcp.len(),
            self.bloom.len(),
            self.errors.len()
        )
    }
}

/// The daily pipeline.
pub struct DailyTask<P: MarketDataSource, S: MarketDataSource> {
    client: Arc<HybridClient<P, S>>,
    storage: Arc<Storage>,
    calendar: Arc<dyn TradingCalendar>,
    vcp: VcpFilter,
    bloom: BloomFilter,
}

impl<P: MarketDataSource, S: MarketDataSource> DailyTask<P, S> {
    pub fn new(
        client: Arc<HybridClient<P, S>>,
        storage: Arc<Storage>,
        calendar: Arc<dyn TradingCalendar>,
        vcp: VcpFilter,
        bloom: BloomFilter,
    ) -> Self {
        Self {
            client,
            storage,
            calendar,
            vcp,
            bloom,
        }
    }

    /// Run the daily screen.
    ///
    /// On a non-trading day the run is either skipped (`skip_non_trading`)
    /// or redirected to the nearest trading day at or before the target.
    pub async fn run(
        &self,
        target_date: Option<NaiveDate>,
        skip_non_trading: bool,
    ) -> Result<DailyReport> {
        let requested = target_date.unwrap_or_else(|| Local::now().date_naive());

        let target = if self.calendar.is_trading_day(requested) {
            requested
        } else if skip_non_trading {
            info!(date = %requested, "Non-trading day, skipping");
            return Ok(DailyReport {
                date: Some(requested),
                skipped: true,
                ..Default::default()
            });
        } else {
            let rolled = self.calendar.latest_trading_day(requested);
            info!(requested = %requested, rolled = %rolled, "Non-trading day, rolling back");
            rolled
        };

        info!(date = %target, "Daily screen starting");
        let mut report = DailyReport {
            date: Some(target),
            ..Default::default()
        };

        // Step 1: prices for the stored universe
        let (symbols, venues) = self.universe_or_refresh().await?;
        let bars = match self
            .client
            .prices(target, target, &symbols, &venues)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                report.errors.push(format!("price fetch failed: {}", e));
                self.collect_logs(&mut report);
                return Ok(report);
            }
        };
        report.price_count = self
            .storage
            .upsert_daily_prices(&bars)
            .await
            .context("Failed to persist daily prices")?;
        if report.price_count == 0 {
            warn!("No price data for the day, stopping");
            report.errors.push("no price data".to_string());
            self.collect_logs(&mut report);
            return Ok(report);
        }

        // Step 2: benchmark index
        match self.client.index(target, target).await {
            Ok(index_bars) => {
                report.index_count = self.storage.upsert_market_index(&index_bars).await?;
            }
            Err(e) => {
                warn!(error = %e, "Index fetch failed, screen comparisons may degrade");
                report.errors.push(format!("index fetch failed: {}", e));
            }
        }

        // Step 3: run the screens over a year of history
        let start = target - Duration::days(HISTORY_DAYS);
        let history = self.storage.get_daily_prices(start, target).await?;
        let index_history = self.storage.get_market_index(start, target).await?;
        let benchmark = market_return(&index_history, target, MARKET_LOOKBACK);
        info!(benchmark_return = format!("{:.2}%", benchmark * 100.0), "Benchmark computed");

        let companies = self.storage.company_map().await?;
        if companies.is_empty() {
            warn!("Company data empty, run the monthly refresh first");
        }

        let vcp_rows = report::vcp_report(
            self.vcp.run(&history, benchmark, Some(target)),
            &companies,
        );
        let bloom_rows =
            report::bloom_report(self.bloom.run(&history, Some(target)), &companies);

        // Step 4: persist the result sets
        self.storage
            .replace_filter_results(target, VCP_KIND, &to_values(&vcp_rows)?)
            .await?;
        self.storage
            .replace_filter_results(target, BLOOM_KIND, &to_values(&bloom_rows)?)
            .await?;

        info!(
            vcp = vcp_rows.len(),
            bloom = bloom_rows.len(),
            "Daily screen finished"
        );
        report.vcp = vcp_rows;
        report.bloom = bloom_rows;
        self.collect_logs(&mut report);
        Ok(report)
    }

    /// The stored symbol universe, self-healing from the network when the
    /// database has never seen a company list.
    async fn universe_or_refresh(
        &self,
    ) -> Result<(Vec<String>, std::collections::HashMap<String, crate::data::Venue>)> {
        let (symbols, venues) = self.storage.universe().await?;
        if !symbols.is_empty() {
            return Ok((symbols, venues));
        }
        warn!("Symbol universe empty, refreshing company list");
        let records = self
            .client
            .company_list()
            .await
            .context("Company list refresh failed")?;
        self.storage.upsert_companies(&records).await?;
        self.storage.universe().await
    }

    fn collect_logs(&self, report: &mut DailyReport) {
        report.fallback_events = self.client.drain_fallback_events();
        report.api_errors = self.client.drain_api_errors();
    }
}

fn to_values<T: serde::Serialize>(rows: &[T]) -> Result<Vec<serde_json::Value>> {
    rows.iter()
        .map(|r| serde_json::to_value(r).context("Failed to serialize result row"))
        .collect()
}
