//! The monthly company-list refresh.

use anyhow::{Context, Result};
use chrono::Local;
use std::sync::Arc;
use tracing::info;

use crate::data::{FallbackEvent, HybridClient, MarketDataSource, Storage};
use crate::report::{self, CompanyMasterRow};

/// Outcome summary of one monthly refresh.
#[derive(Debug, Default)]
pub struct MonthlyReport {
    pub stock_count: usize,
    pub master: Vec<CompanyMasterRow>,
    pub errors: Vec<String>,
    pub fallback_events: Vec<FallbackEvent>,
}

impl std::fmt::Display for MonthlyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Monthly refresh: {} companies, {} errors",
            self.stock_count,
            self.errors.len()
        )
    }
}

/// The monthly pipeline: refresh the universe and build the master feed.
pub struct MonthlyTask<P: MarketDataSource, S: MarketDataSource> {
    client: Arc<HybridClient<P, S>>,
    storage: Arc<Storage>,
}

impl<P: MarketDataSource, S: MarketDataSource> MonthlyTask<P, S> {
    pub fn new(client: Arc<HybridClient<P, S>>, storage: Arc<Storage>) -> Self {
        Self { client, storage }
    }

    pub async fn run(&self) -> Result<MonthlyReport> {
        info!(date = %Local::now().date_naive(), "Monthly refresh starting");
        let mut report = MonthlyReport::default();

        let records = match self.client.company_list().await {
            Ok(records) if !records.is_empty() => records,
            Ok(_) => {
                report.errors.push("company list came back empty".to_string());
                report.fallback_events = self.client.drain_fallback_events();
                return Ok(report);
            }
            Err(e) => {
                report.errors.push(format!("company list failed: {}", e));
                report.fallback_events = self.client.drain_fallback_events();
                return Ok(report);
            }
        };

        report.stock_count = self
            .storage
            .upsert_companies(&records)
            .await
            .context("Failed to persist companies")?;
        report.master = report::company_master(&records);
        report.fallback_events = self.client.drain_fallback_events();

        info!(companies = report.stock_count, "Monthly refresh finished");
        Ok(report)
    }
}
