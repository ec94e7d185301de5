//! SQLite persistence for the screener.
//!
//! Everything is keyed for idempotency: re-running a day's task leaves one
//! row per (symbol, date), and filter results are fully replaced per
//! (date, kind).

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CompanyRecord, IndexBar, PriceBar, Venue};

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stock_info (
    stock_id TEXT PRIMARY KEY,
    stock_name TEXT NOT NULL,
    industry_category TEXT NOT NULL DEFAULT '-',
    industry_category2 TEXT NOT NULL DEFAULT '-',
    market TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_prices (
    stock_id TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL,
    high REAL,
    low REAL,
    close REAL,
    volume REAL,
    UNIQUE(stock_id, date)
);

CREATE INDEX IF NOT EXISTS idx_daily_prices_date ON daily_prices(date);

CREATE TABLE IF NOT EXISTS market_index (
    date TEXT PRIMARY KEY,
    level REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS filter_results (
    date TEXT NOT NULL,
    filter_kind TEXT NOT NULL,
    stock_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    UNIQUE(date, filter_kind, stock_id)
);
"#;

const DATE_FMT: &str = "%Y-%m-%d";

/// SQLite-backed storage.
pub struct Storage {
    /// rusqlite::Connection is Send but not Sync, so Mutex rather than RwLock
    db: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", path.as_ref()))?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create tables")?;
        info!("Storage initialized");
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    // ========================================================================
    // Company Universe
    // ========================================================================

    pub async fn upsert_companies(&self, records: &[CompanyRecord]) -> Result<usize> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO stock_info
                 (stock_id, stock_name, industry_category, industry_category2, market, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.stock_id,
                    r.stock_name,
                    r.industry_category,
                    r.industry_category2,
                    r.venue.to_string(),
                    now,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = records.len(), "Companies upserted");
        Ok(records.len())
    }

    /// Full company map keyed by symbol.
    pub async fn company_map(&self) -> Result<HashMap<String, CompanyRecord>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT stock_id, stock_name, industry_category, industry_category2, market
             FROM stock_info",
        )?;
        let rows = stmt.query_map([], |row| {
            let market: String = row.get(4)?;
            Ok(CompanyRecord {
                stock_id: row.get(0)?,
                stock_name: row.get(1)?,
                industry_category: row.get(2)?,
                industry_category2: row.get(3)?,
                venue: Venue::parse(&market).unwrap_or(Venue::Twse),
            })
        })?;
        let mut map = HashMap::new();
        for record in rows {
            let record = record?;
            map.insert(record.stock_id.clone(), record);
        }
        Ok(map)
    }

    /// Symbol list plus venue lookup, the shape the price fetch needs.
    pub async fn universe(&self) -> Result<(Vec<String>, HashMap<String, Venue>)> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare("SELECT stock_id, market FROM stock_info ORDER BY stock_id")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let market: String = row.get(1)?;
            Ok((id, market))
        })?;
        let mut symbols = Vec::new();
        let mut venues = HashMap::new();
        for row in rows {
            let (id, market) = row?;
            venues.insert(id.clone(), Venue::parse(&market).unwrap_or(Venue::Twse));
            symbols.push(id);
        }
        Ok((symbols, venues))
    }

    // ========================================================================
    // Prices
    // ========================================================================

    pub async fn upsert_daily_prices(&self, bars: &[PriceBar]) -> Result<usize> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO daily_prices
                 (stock_id, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for b in bars {
                stmt.execute(params![
                    b.stock_id,
                    b.date.format(DATE_FMT).to_string(),
                    b.open,
                    b.high,
                    b.low,
                    b.close,
                    b.volume,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = bars.len(), "Daily prices upserted");
        Ok(bars.len())
    }

    pub async fn get_daily_prices(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT stock_id, date, open, high, low, close, volume
             FROM daily_prices
             WHERE date >= ?1 AND date <= ?2
             ORDER BY stock_id, date",
        )?;
        let rows = stmt.query_map(
            params![
                start.format(DATE_FMT).to_string(),
                end.format(DATE_FMT).to_string()
            ],
            |row| {
                let date: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    date,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                ))
            },
        )?;
        let mut bars = Vec::new();
        for row in rows {
            let (stock_id, date, open, high, low, close, volume) = row?;
            let date = NaiveDate::parse_from_str(&date, DATE_FMT)
                .with_context(|| format!("Bad date in daily_prices: {}", date))?;
            bars.push(PriceBar {
                stock_id,
                date,
                open,
                high,
                low,
                close,
                volume,
            });
        }
        Ok(bars)
    }

    // ========================================================================
    // Market Index
    // ========================================================================

    pub async fn upsert_market_index(&self, bars: &[IndexBar]) -> Result<usize> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO market_index (date, level) VALUES (?1, ?2)",
            )?;
            for b in bars {
                stmt.execute(params![b.date.format(DATE_FMT).to_string(), b.level])?;
            }
        }
        tx.commit()?;
        Ok(bars.len())
    }

    pub async fn get_market_index(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<IndexBar>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT date, level FROM market_index
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date",
        )?;
        let rows = stmt.query_map(
            params![
                start.format(DATE_FMT).to_string(),
                end.format(DATE_FMT).to_string()
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?;
        let mut bars = Vec::new();
        for row in rows {
            let (date, level) = row?;
            let date = NaiveDate::parse_from_str(&date, DATE_FMT)
                .with_context(|| format!("Bad date in market_index: {}", date))?;
            bars.push(IndexBar { date, level });
        }
        Ok(bars)
    }

    // ========================================================================
    // Filter Results
    // ========================================================================

    /// Replace the whole result set for one (date, kind).
    pub async fn replace_filter_results(
        &self,
        date: NaiveDate,
        kind: &str,
        rows: &[serde_json::Value],
    ) -> Result<usize> {
        let date_s = date.format(DATE_FMT).to_string();
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM filter_results WHERE date = ?1 AND filter_kind = ?2",
            params![date_s, kind],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO filter_results (date, filter_kind, stock_id, payload)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in rows {
                let stock_id = row
                    .get("stock_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                stmt.execute(params![date_s, kind, stock_id, row.to_string()])?;
            }
        }
        tx.commit()?;
        debug!(date = %date, kind, count = rows.len(), "Filter results replaced");
        Ok(rows.len())
    }

    pub async fn get_filter_results(
        &self,
        date: NaiveDate,
        kind: &str,
    ) -> Result<Vec<serde_json::Value>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT payload FROM filter_results
             WHERE date = ?1 AND filter_kind = ?2
             ORDER BY stock_id",
        )?;
        let rows = stmt.query_map(
            params![date.format(DATE_FMT).to_string(), kind],
            |row| row.get::<_, String>(0),
        )?;
        let mut values = Vec::new();
        for row in rows {
            values.push(serde_json::from_str(&row?)?);
        }
        Ok(values)
    }
}
