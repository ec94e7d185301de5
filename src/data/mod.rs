//! Market data layer for Taiwan equities.
//!
//! Two upstream sources (a rate-limited API and a free bulk source) feed a
//! hybrid coordinator that handles fallback and gap-fill. All sources
//! normalize into the types defined here.

pub mod downloader;
pub mod error;
pub mod finmind;
pub mod hybrid;
pub mod industry;
pub mod rate_limiter;
pub mod retry;
pub mod storage;
pub mod yahoo;

pub use downloader::{AdaptiveBatchDownloader, DownloaderConfig};
pub use error::SourceError;
pub use finmind::FinMindClient;
pub use hybrid::HybridClient;
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use retry::RetryPolicy;
pub use storage::Storage;
pub use yahoo::YahooClient;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Core Types
// ============================================================================

/// Trading venue for a listed security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// Taiwan Stock Exchange (listed board)
    Twse,
    /// Taipei Exchange (OTC board)
    Tpex,
}

impl Venue {
    /// Parse a venue from the API `type` field.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "twse" => Some(Self::Twse),
            "tpex" => Some(Self::Tpex),
            _ => None,
        }
    }

    /// Yahoo-style ticker suffix for this venue.
    pub fn ticker_suffix(&self) -> &'static str {
        match self {
            Self::Twse => ".TW",
            Self::Tpex => ".TWO",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Twse => write!(f, "twse"),
            Self::Tpex => write!(f, "tpex"),
        }
    }
}

/// A company in the screening universe.
///
/// The two industry slots hold the priority-merged category tags, most
/// specific first, `"-"` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub stock_id: String,
    pub stock_name: String,
    pub industry_category: String,
    pub industry_category2: String,
    pub venue: Venue,
}

/// One day of OHLCV data for one symbol.
///
/// Either source may omit individual fields, so all of them are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub stock_id: String,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// One day of the benchmark index, normalized to a single level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexBar {
    pub date: NaiveDate,
    pub level: f64,
}

/// A recorded fallback or gap-fill decision by the hybrid coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub primary: String,
    pub fallback: String,
    pub reason: String,
}

/// One failed API attempt, retried or terminal, recorded with sanitized
/// parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub operation: String,
    pub message: String,
    /// HTTP or envelope status, when one was available
    pub status: Option<u16>,
    /// Zero-based attempt index within the retry loop
    pub attempt: u32,
    /// Request parameters with the auth token stripped
    pub params: Vec<(String, String)>,
}

// ============================================================================
// Source Trait
// ============================================================================

/// A market data source capable of serving the three fetch operations.
///
/// Implemented by both upstream clients; the hybrid coordinator composes
/// two of these. Tests substitute mock implementations.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Source name for logging and fallback events.
    fn name(&self) -> &'static str;

    /// Fetch the full company universe.
    async fn fetch_company_list(&self) -> Result<Vec<CompanyRecord>, SourceError>;

    /// Fetch daily bars for the date range.
    ///
    /// `symbols` scopes the request when non-empty; `venues` maps symbols to
    /// their board for sources that need venue-qualified tickers.
    async fn fetch_prices(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        symbols: &[String],
        venues: &HashMap<String, Venue>,
    ) -> Result<Vec<PriceBar>, SourceError>;

    /// Fetch benchmark index levels for the date range.
    async fn fetch_index(&self, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<IndexBar>, SourceError>;

    /// Drain accumulated terminal API errors, if the source records any.
    fn drain_errors(&self) -> Vec<ApiErrorEntry> {
        Vec::new()
    }
}
