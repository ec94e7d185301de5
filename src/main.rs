//! twscreen - scheduled technical screener for Taiwan equities.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use twscreen::calc::{BloomFilter, VcpFilter};
use twscreen::data::{FinMindClient, HybridClient, RetryPolicy, Storage, YahooClient};
use twscreen::tasks::{DailyTask, MonthlyTask, TaskScheduler, WeekdayCalendar};
use twscreen::Settings;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_usage() {
    eprintln!("Usage: twscreen <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  init               refresh the company list and backfill a year of prices");
    eprintln!("  daily [YYYY-MM-DD] run the daily screen (defaults to today)");
    eprintln!("  monthly            refresh the company list");
    eprintln!("  schedule           run unattended on the configured cron schedules");
}

#[tokio::main]
async fn main() -> Result<()> {
    let startup = std::time::Instant::now();

    let settings = Settings::load()?;
    init_logging(&settings.log_level);
    tracing::info!("twscreen v{}", env!("CARGO_PKG_VERSION"));

    let storage = Arc::new(Storage::open(&settings.storage.db_path)?);
    let retry = RetryPolicy::new(settings.retry.clone());
    let finmind = FinMindClient::new(&settings.api, retry.clone())?;
    let yahoo = YahooClient::new(settings.downloader.clone(), settings.retry.max_retries)?;
    let client = Arc::new(HybridClient::new(finmind, yahoo, settings.hybrid.clone()));
    let calendar = Arc::new(WeekdayCalendar::new());

    let daily = DailyTask::new(
        client.clone(),
        storage.clone(),
        calendar,
        VcpFilter::new(settings.vcp.clone()),
        BloomFilter::new(settings.bloom.clone()),
    );
    let monthly = MonthlyTask::new(client.clone(), storage.clone());

    tracing::info!(
        duration_ms = startup.elapsed().as_millis() as u64,
        "Service initialized"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("init") => {
            let report = monthly.run().await?;
            tracing::info!("{}", report);
            if report.stock_count == 0 {
                bail!("Initialization failed: no companies fetched");
            }
            let end = chrono::Local::now().date_naive();
            let start = end - chrono::Duration::days(365);
            let (symbols, venues) = storage.universe().await?;
            tracing::info!(symbols = symbols.len(), "Backfilling a year of prices");
            let bars = client
                .prices(start, end, &symbols, &venues)
                .await
                .map_err(|e| anyhow::anyhow!("Backfill failed: {}", e))?;
            let count = storage.upsert_daily_prices(&bars).await?;
            match client.index(start, end).await {
                Ok(index_bars) => {
                    storage.upsert_market_index(&index_bars).await?;
                }
                Err(e) => tracing::warn!(error = %e, "Index backfill failed"),
            }
            tracing::info!(prices = count, "Initialization complete");
        }
        Some("daily") => {
            let target = match args.get(1) {
                Some(s) => Some(
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .map_err(|_| anyhow::anyhow!("Invalid date: {}", s))?,
                ),
                None => None,
            };
            let report = daily.run(target, true).await?;
            tracing::info!("{}", report);
            if !report.errors.is_empty() {
                for err in &report.errors {
                    tracing::warn!(error = %err, "Daily run reported an error");
                }
            }
        }
        Some("monthly") => {
            let report = monthly.run().await?;
            tracing::info!("{}", report);
        }
        Some("schedule") => {
            let scheduler = TaskScheduler::new(settings.schedule.clone(), daily, monthly)?;
            tokio::select! {
                result = scheduler.run() => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                }
            }
        }
        _ => {
            print_usage();
            bail!("Missing or unknown command");
        }
    }

    Ok(())
}
