//! End-to-end daily pipeline test with mock upstream sources.
//!
//! Seeds storage with a year of history, serves the target day through the
//! hybrid coordinator (forcing a gap-fill), and checks that both screens
//! persist ranked results.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;

use twscreen::calc::{BloomFilter, VcpFilter};
use twscreen::data::hybrid::HybridConfig;
use twscreen::data::{
    CompanyRecord, HybridClient, IndexBar, MarketDataSource, PriceBar, SourceError, Storage,
    Venue,
};
use twscreen::tasks::{DailyTask, TradingCalendar};

const HISTORY_LEN: usize = 300;

fn target_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 5).unwrap()
}

fn date_at(offset_from_end: usize) -> NaiveDate {
    target_date() - Duration::days((HISTORY_LEN - 1 - offset_from_end) as i64)
}

fn bar(stock_id: &str, date: NaiveDate, close: f64) -> PriceBar {
    PriceBar {
        stock_id: stock_id.to_string(),
        date,
        open: Some(close),
        high: Some(close + 1.0),
        low: Some(close - 1.0),
        close: Some(close),
        volume: Some(1000.0),
    }
}

/// Rising series for the screener to pick up, flat series for it to reject.
fn history_bar(stock_id: &str, i: usize) -> PriceBar {
    let close = match stock_id {
        "2330" => 100.0 + i as f64,
        _ => 50.0,
    };
    bar(stock_id, date_at(i), close)
}

struct AlwaysOpen;

impl TradingCalendar for AlwaysOpen {
    fn is_trading_day(&self, _date: NaiveDate) -> bool {
        true
    }
}

/// Serves canned bars for the symbols it covers, scoped to the request.
struct MockSource {
    name: &'static str,
    bars: Vec<PriceBar>,
    index: Vec<IndexBar>,
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch_company_list(&self) -> Result<Vec<CompanyRecord>, SourceError> {
        Ok(Vec::new())
    }

    async fn fetch_prices(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        symbols: &[String],
        _venues: &HashMap<String, Venue>,
    ) -> Result<Vec<PriceBar>, SourceError> {
        Ok(self
            .bars
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .filter(|b| symbols.is_empty() || symbols.contains(&b.stock_id))
            .cloned()
            .collect())
    }

    async fn fetch_index(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IndexBar>, SourceError> {
        Ok(self
            .index
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .cloned()
            .collect())
    }
}

fn company(id: &str, name: &str) -> CompanyRecord {
    CompanyRecord {
        stock_id: id.to_string(),
        stock_name: name.to_string(),
        industry_category: "半導體業".to_string(),
        industry_category2: "電子工業".to_string(),
        venue: Venue::Twse,
    }
}

async fn seed_storage(storage: &Storage) {
    storage
        .upsert_companies(&[company("2330", "台積電"), company("2412", "中華電")])
        .await
        .unwrap();

    // Everything except the target day is already stored
    let mut bars = Vec::new();
    let mut index = Vec::new();
    for i in 0..HISTORY_LEN - 1 {
        bars.push(history_bar("2330", i));
        bars.push(history_bar("2412", i));
        index.push(IndexBar {
            date: date_at(i),
            level: 23000.0,
        });
    }
    storage.upsert_daily_prices(&bars).await.unwrap();
    storage.upsert_market_index(&index).await.unwrap();
}

#[tokio::test]
async fn test_daily_pipeline_with_gap_fill() {
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    seed_storage(&storage).await;

    let last = HISTORY_LEN - 1;
    // Secondary only covers 2330; the primary must gap-fill 2412
    let secondary = MockSource {
        name: "secondary",
        bars: vec![history_bar("2330", last)],
        index: vec![IndexBar {
            date: target_date(),
            level: 23000.0,
        }],
    };
    let primary = MockSource {
        name: "primary",
        bars: vec![history_bar("2330", last), history_bar("2412", last)],
        index: Vec::new(),
    };

    let client = Arc::new(HybridClient::new(primary, secondary, HybridConfig::default()));
    let task = DailyTask::new(
        client.clone(),
        storage.clone(),
        Arc::new(AlwaysOpen),
        VcpFilter::default(),
        BloomFilter::default(),
    );

    let report = task.run(Some(target_date()), true).await.unwrap();

    assert!(!report.skipped);
    // Union of the secondary row and the gap-filled one
    assert_eq!(report.price_count, 2);
    assert_eq!(report.index_count, 1);

    // The gap-fill decision was recorded and drained into the report
    assert!(report
        .fallback_events
        .iter()
        .any(|e| e.operation == "prices.gap_fill"));

    // The rising symbol passes both screens, the flat one passes neither
    assert_eq!(report.vcp.len(), 1);
    assert_eq!(report.vcp[0].stock_id, "2330");
    assert_eq!(report.vcp[0].stock_name, "台積電");
    assert!(report.vcp[0].is_strong);
    assert_eq!(report.bloom.len(), 1);
    assert_eq!(report.bloom[0].stock_id, "2330");
    assert!(report.bloom[0].gap_ratio > 0.0);

    // Results were persisted and are re-readable
    let stored = storage
        .get_filter_results(target_date(), "vcp")
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["stock_id"], "2330");
}

#[tokio::test]
async fn test_daily_pipeline_rerun_is_idempotent() {
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    seed_storage(&storage).await;

    let last = HISTORY_LEN - 1;
    let make_client = || {
        let secondary = MockSource {
            name: "secondary",
            bars: vec![history_bar("2330", last), history_bar("2412", last)],
            index: vec![IndexBar {
                date: target_date(),
                level: 23000.0,
            }],
        };
        let primary = MockSource {
            name: "primary",
            bars: Vec::new(),
            index: Vec::new(),
        };
        Arc::new(HybridClient::new(primary, secondary, HybridConfig::default()))
    };

    for _ in 0..2 {
        let task = DailyTask::new(
            make_client(),
            storage.clone(),
            Arc::new(AlwaysOpen),
            VcpFilter::default(),
            BloomFilter::default(),
        );
        let report = task.run(Some(target_date()), true).await.unwrap();
        assert_eq!(report.price_count, 2);
    }

    // One row per (symbol, date) and one result set despite two runs
    let bars = storage
        .get_daily_prices(target_date(), target_date())
        .await
        .unwrap();
    assert_eq!(bars.len(), 2);
    let stored = storage
        .get_filter_results(target_date(), "vcp")
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_daily_pipeline_skips_non_trading_day() {
    struct NeverOpen;
    impl TradingCalendar for NeverOpen {
        fn is_trading_day(&self, _date: NaiveDate) -> bool {
            false
        }
    }

    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let client = Arc::new(HybridClient::new(
        MockSource {
            name: "primary",
            bars: Vec::new(),
            index: Vec::new(),
        },
        MockSource {
            name: "secondary",
            bars: Vec::new(),
            index: Vec::new(),
        },
        HybridConfig::default(),
    ));
    let task = DailyTask::new(
        client,
        storage,
        Arc::new(NeverOpen),
        VcpFilter::default(),
        BloomFilter::default(),
    );

    let report = task.run(Some(target_date()), true).await.unwrap();
    assert!(report.skipped);
    assert_eq!(report.price_count, 0);
}
