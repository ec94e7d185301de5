//! Hybrid coordination of the two upstream sources.
//!
//! The quota-bound primary is authoritative for the company universe; the
//! free secondary carries the bulk price load. Every fallback or gap-fill
//! decision is recorded so the exporter can surface it.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{info, warn};

use super::{
    ApiErrorEntry, CompanyRecord, FallbackEvent, IndexBar, MarketDataSource, PriceBar,
    SourceError, Venue,
};

/// Thresholds governing when the coordinator distrusts a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    /// A company list shorter than this is considered truncated
    #[serde(default = "default_min_stock_count")]
    pub min_stock_count: usize,
    /// Minimum fraction of requested symbols a price result must cover
    #[serde(default = "default_min_price_ratio")]
    pub min_price_ratio: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            min_stock_count: default_min_stock_count(),
            min_price_ratio: default_min_price_ratio(),
        }
    }
}

fn default_min_stock_count() -> usize {
    1000
}

fn default_min_price_ratio() -> f64 {
    0.5
}

/// Coordinator over a primary and a secondary data source.
pub struct HybridClient<P: MarketDataSource, S: MarketDataSource> {
    primary: P,
    secondary: S,
    config: HybridConfig,
    fallback_log: Mutex<Vec<FallbackEvent>>,
}

impl<P: MarketDataSource, S: MarketDataSource> HybridClient<P, S> {
    pub fn new(primary: P, secondary: S, config: HybridConfig) -> Self {
        Self {
            primary,
            secondary,
            config,
            fallback_log: Mutex::new(Vec::new()),
        }
    }

    fn record_fallback(&self, operation: &str, from: &str, to: &str, reason: String) {
        warn!(operation, from, to, reason = %reason, "Falling back");
        if let Ok(mut log) = self.fallback_log.lock() {
            log.push(FallbackEvent {
                timestamp: Utc::now(),
                operation: operation.to_string(),
                primary: from.to_string(),
                fallback: to.to_string(),
                reason,
            });
        }
    }

    /// Fallback events recorded so far.
    pub fn fallback_events(&self) -> Vec<FallbackEvent> {
        self.fallback_log
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Take and clear the fallback events.
    pub fn drain_fallback_events(&self) -> Vec<FallbackEvent> {
        self.fallback_log
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default()
    }

    /// Drain terminal API errors from both sources.
    pub fn drain_api_errors(&self) -> Vec<ApiErrorEntry> {
        let mut errors = self.primary.drain_errors();
        errors.extend(self.secondary.drain_errors());
        errors
    }

    /// Company universe: primary first, secondary when the primary errors,
    /// comes back empty, or looks truncated.
    pub async fn company_list(&self) -> Result<Vec<CompanyRecord>, SourceError> {
        let primary_rows = match self.primary.fetch_company_list().await {
            Ok(rows) if rows.len() >= self.config.min_stock_count => {
                info!(source = self.primary.name(), companies = rows.len(), "Company list");
                return Ok(rows);
            }
            Ok(rows) => {
                self.record_fallback(
                    "company_list",
                    self.primary.name(),
                    self.secondary.name(),
                    format!(
                        "primary returned {} companies, below threshold {}",
                        rows.len(),
                        self.config.min_stock_count
                    ),
                );
                rows
            }
            Err(e) => {
                self.record_fallback(
                    "company_list",
                    self.primary.name(),
                    self.secondary.name(),
                    format!("primary error: {}", e),
                );
                Vec::new()
            }
        };

        match self.secondary.fetch_company_list().await {
            Ok(rows) if !rows.is_empty() => Ok(rows),
            Ok(_) if !primary_rows.is_empty() => {
                warn!("Secondary company list empty, keeping short primary result");
                Ok(primary_rows)
            }
            Ok(rows) => Ok(rows),
            Err(e) if !primary_rows.is_empty() => {
                warn!(error = %e, "Secondary company list failed, keeping short primary result");
                Ok(primary_rows)
            }
            Err(e) => Err(e),
        }
    }

    /// Daily prices: secondary first. Full fallback when it errors, comes
    /// back empty, or covers too few symbols; otherwise the missing symbol
    /// set is gap-filled from the primary and the rows unioned.
    pub async fn prices(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        symbols: &[String],
        venues: &HashMap<String, Venue>,
    ) -> Result<Vec<PriceBar>, SourceError> {
        let mut rows = match self.secondary.fetch_prices(start, end, symbols, venues).await {
            Ok(rows) => rows,
            Err(e) => {
                self.record_fallback(
                    "prices",
                    self.secondary.name(),
                    self.primary.name(),
                    format!("secondary error: {}", e),
                );
                return self.primary.fetch_prices(start, end, symbols, venues).await;
            }
        };

        if symbols.is_empty() {
            return Ok(rows);
        }

        let covered: HashSet<&str> = rows.iter().map(|b| b.stock_id.as_str()).collect();
        let ratio = covered.len() as f64 / symbols.len() as f64;

        if rows.is_empty() || ratio < self.config.min_price_ratio {
            self.record_fallback(
                "prices",
                self.secondary.name(),
                self.primary.name(),
                format!(
                    "secondary covered {}/{} symbols ({:.0}%)",
                    covered.len(),
                    symbols.len(),
                    ratio * 100.0
                ),
            );
            return self.primary.fetch_prices(start, end, symbols, venues).await;
        }

        let missing: Vec<String> = symbols
            .iter()
            .filter(|s| !covered.contains(s.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(rows);
        }

        self.record_fallback(
            "prices.gap_fill",
            self.secondary.name(),
            self.primary.name(),
            format!("gap-filling {} missing symbols", missing.len()),
        );
        match self.primary.fetch_prices(start, end, &missing, venues).await {
            Ok(extra) => {
                info!(filled = extra.len(), "Gap-fill rows merged");
                rows.extend(extra);
                Ok(rows)
            }
            Err(e) => {
                // Partial data beats no data
                warn!(error = %e, "Gap-fill failed, returning partial result");
                Ok(rows)
            }
        }
    }

    /// Benchmark index: secondary first, wholesale fallback to primary.
    pub async fn index(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IndexBar>, SourceError> {
        match self.secondary.fetch_index(start, end).await {
            Ok(bars) if !bars.is_empty() => Ok(bars),
            Ok(_) => {
                self.record_fallback(
                    "index",
                    self.secondary.name(),
                    self.primary.name(),
                    "secondary returned no index data".to_string(),
                );
                self.primary.fetch_index(start, end).await
            }
            Err(e) => {
                self.record_fallback(
                    "index",
                    self.secondary.name(),
                    self.primary.name(),
                    format!("secondary error: {}", e),
                );
                self.primary.fetch_index(start, end).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticSource {
        name: &'static str,
        companies: Result<Vec<CompanyRecord>, SourceError>,
        prices: Result<Vec<PriceBar>, SourceError>,
        index: Result<Vec<IndexBar>, SourceError>,
    }

    impl StaticSource {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                companies: Ok(Vec::new()),
                prices: Ok(Vec::new()),
                index: Ok(Vec::new()),
            }
        }
    }

    fn clone_result<T: Clone>(r: &Result<T, SourceError>) -> Result<T, SourceError> {
        match r {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(e.clone()),
        }
    }

    #[async_trait]
    impl MarketDataSource for StaticSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_company_list(&self) -> Result<Vec<CompanyRecord>, SourceError> {
            clone_result(&self.companies)
        }

        async fn fetch_prices(
            &self,
            _start: NaiveDate,
            _end: NaiveDate,
            symbols: &[String],
            _venues: &HashMap<String, Venue>,
        ) -> Result<Vec<PriceBar>, SourceError> {
            // Scope the canned rows like a real source would
            clone_result(&self.prices).map(|rows| {
                if symbols.is_empty() {
                    rows
                } else {
                    rows.into_iter()
                        .filter(|b| symbols.contains(&b.stock_id))
                        .collect()
                }
            })
        }

        async fn fetch_index(
            &self,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<IndexBar>, SourceError> {
            clone_result(&self.index)
        }
    }

    fn company(id: &str) -> CompanyRecord {
        CompanyRecord {
            stock_id: id.to_string(),
            stock_name: format!("公司{}", id),
            industry_category: "-".to_string(),
            industry_category2: "-".to_string(),
            venue: Venue::Twse,
        }
    }

    fn bar(id: &str) -> PriceBar {
        PriceBar {
            stock_id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            open: Some(1.0),
            high: Some(1.0),
            low: Some(1.0),
            close: Some(1.0),
            volume: Some(1.0),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
    }

    #[tokio::test]
    async fn test_company_list_short_primary_falls_back() {
        let mut primary = StaticSource::new("primary");
        primary.companies = Ok(vec![company("2330")]);
        let mut secondary = StaticSource::new("secondary");
        secondary.companies = Ok((0..1500).map(|i| company(&format!("{:04}", i + 1000))).collect());

        let hybrid = HybridClient::new(primary, secondary, HybridConfig::default());
        let rows = hybrid.company_list().await.unwrap();
        assert_eq!(rows.len(), 1500);

        let events = hybrid.fallback_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, "company_list");
        assert!(events[0].reason.contains("below threshold"));
    }

    #[tokio::test]
    async fn test_company_list_primary_sufficient() {
        let mut primary = StaticSource::new("primary");
        primary.companies = Ok((0..1200).map(|i| company(&format!("{:04}", i + 1000))).collect());
        let secondary = StaticSource::new("secondary");

        let hybrid = HybridClient::new(primary, secondary, HybridConfig::default());
        let rows = hybrid.company_list().await.unwrap();
        assert_eq!(rows.len(), 1200);
        assert!(hybrid.fallback_events().is_empty());
    }

    #[tokio::test]
    async fn test_prices_gap_fill_union() {
        let symbols: Vec<String> = vec!["2330".into(), "2317".into(), "2603".into()];
        let mut secondary = StaticSource::new("secondary");
        secondary.prices = Ok(vec![bar("2330"), bar("2317")]);
        let mut primary = StaticSource::new("primary");
        primary.prices = Ok(vec![bar("2330"), bar("2317"), bar("2603")]);

        let hybrid = HybridClient::new(primary, secondary, HybridConfig::default());
        let rows = hybrid
            .prices(date(), date(), &symbols, &HashMap::new())
            .await
            .unwrap();

        // Secondary's two rows plus the gap-filled 2603 only
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().any(|b| b.stock_id == "2603"));

        let events = hybrid.fallback_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, "prices.gap_fill");
    }

    #[tokio::test]
    async fn test_prices_low_coverage_full_fallback() {
        let symbols: Vec<String> = (0..10).map(|i| format!("{:04}", 2000 + i)).collect();
        let mut secondary = StaticSource::new("secondary");
        secondary.prices = Ok(vec![bar("2000")]); // 10% coverage
        let mut primary = StaticSource::new("primary");
        primary.prices = Ok(symbols.iter().map(|s| bar(s)).collect());

        let hybrid = HybridClient::new(primary, secondary, HybridConfig::default());
        let rows = hybrid
            .prices(date(), date(), &symbols, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 10);

        let events = hybrid.fallback_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, "prices");
    }

    #[tokio::test]
    async fn test_prices_gap_fill_failure_returns_partial() {
        let symbols: Vec<String> = vec!["2330".into(), "2317".into(), "2603".into()];
        let mut secondary = StaticSource::new("secondary");
        secondary.prices = Ok(vec![bar("2330"), bar("2317")]);
        let mut primary = StaticSource::new("primary");
        primary.prices = Err(SourceError::Exhausted {
            status: Some(500),
            attempts: 3,
        });

        let hybrid = HybridClient::new(primary, secondary, HybridConfig::default());
        let rows = hybrid
            .prices(date(), date(), &symbols, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_index_wholesale_fallback() {
        let mut secondary = StaticSource::new("secondary");
        secondary.index = Err(SourceError::Network("timeout".into()));
        let mut primary = StaticSource::new("primary");
        primary.index = Ok(vec![IndexBar {
            date: date(),
            level: 23000.0,
        }]);

        let hybrid = HybridClient::new(primary, secondary, HybridConfig::default());
        let bars = hybrid.index(date(), date()).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(hybrid.fallback_events().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_clears_events() {
        let mut secondary = StaticSource::new("secondary");
        secondary.index = Ok(Vec::new());
        let primary = StaticSource::new("primary");

        let hybrid = HybridClient::new(primary, secondary, HybridConfig::default());
        let _ = hybrid.index(date(), date()).await;
        assert_eq!(hybrid.drain_fallback_events().len(), 1);
        assert!(hybrid.fallback_events().is_empty());
    }
}
