//! Exporter-facing result shapes.
//!
//! The exporter itself lives outside this crate; the contract here ends at
//! producing enriched, ranked, serializable rows plus the fallback and
//! error logs collected during the run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::calc::{BloomMatch, VcpMatch};
use crate::data::CompanyRecord;

/// A VCP result row enriched with company data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcpReportRow {
    pub stock_id: String,
    pub stock_name: String,
    pub industry_category: String,
    pub industry_category2: String,
    pub date: NaiveDate,
    pub close_price: f64,
    pub return_20d: Option<f64>,
    pub is_strong: bool,
    pub is_new_high: bool,
}

/// A bloom result row enriched with company data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomReportRow {
    pub stock_id: String,
    pub stock_name: String,
    pub industry_category: String,
    pub industry_category2: String,
    pub date: NaiveDate,
    pub today_price: f64,
    pub second_high_55d: Option<f64>,
    pub gap_ratio: f64,
}

/// One company-master row for the monthly feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyMasterRow {
    pub stock_id: String,
    pub stock_name: String,
    pub company_name: String,
    pub industry_category: String,
    pub industry_category2: String,
    pub product_mix: String,
}

fn lookup<'a>(
    companies: &'a HashMap<String, CompanyRecord>,
    stock_id: &str,
) -> (String, String, String) {
    match companies.get(stock_id) {
        Some(c) => (
            c.stock_name.clone(),
            c.industry_category.clone(),
            c.industry_category2.clone(),
        ),
        None => (String::new(), "-".to_string(), "-".to_string()),
    }
}

/// Enrich VCP matches and rank by 20-day return, best first, undefined last.
pub fn vcp_report(
    matches: Vec<VcpMatch>,
    companies: &HashMap<String, CompanyRecord>,
) -> Vec<VcpReportRow> {
    let mut rows: Vec<VcpReportRow> = matches
        .into_iter()
        .map(|m| {
            let (name, cat, cat2) = lookup(companies, &m.stock_id);
            VcpReportRow {
                stock_id: m.stock_id,
                stock_name: name,
                industry_category: cat,
                industry_category2: cat2,
                date: m.date,
                close_price: m.close_price,
                return_20d: m.return_20d,
                is_strong: m.is_strong,
                is_new_high: m.is_new_high,
            }
        })
        .collect();
    rows.sort_by(|a, b| match (a.return_20d, b.return_20d) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    rows
}

/// Enrich bloom matches and rank by gap ratio, widest first.
pub fn bloom_report(
    matches: Vec<BloomMatch>,
    companies: &HashMap<String, CompanyRecord>,
) -> Vec<BloomReportRow> {
    let mut rows: Vec<BloomReportRow> = matches
        .into_iter()
        .map(|m| {
            let (name, cat, cat2) = lookup(companies, &m.stock_id);
            BloomReportRow {
                stock_id: m.stock_id,
                stock_name: name,
                industry_category: cat,
                industry_category2: cat2,
                date: m.date,
                today_price: m.today_price,
                second_high_55d: m.second_high_55d,
                gap_ratio: m.gap_ratio,
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        b.gap_ratio
            .partial_cmp(&a.gap_ratio)
            .unwrap_or(Ordering::Equal)
    });
    rows
}

/// Company-master feed rows for the monthly refresh.
pub fn company_master(records: &[CompanyRecord]) -> Vec<CompanyMasterRow> {
    records
        .iter()
        .map(|r| CompanyMasterRow {
            stock_id: r.stock_id.clone(),
            stock_name: r.stock_name.clone(),
            company_name: r.stock_name.clone(),
            industry_category: r.industry_category.clone(),
            industry_category2: r.industry_category2.clone(),
            product_mix: "-".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Venue;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
    }

    fn companies() -> HashMap<String, CompanyRecord> {
        let mut map = HashMap::new();
        map.insert(
            "2330".to_string(),
            CompanyRecord {
                stock_id: "2330".to_string(),
                stock_name: "台積電".to_string(),
                industry_category: "半導體業".to_string(),
                industry_category2: "電子工業".to_string(),
                venue: Venue::Twse,
            },
        );
        map
    }

    fn vcp(id: &str, ret: Option<f64>) -> VcpMatch {
        VcpMatch {
            stock_id: id.to_string(),
            date: day(),
            close_price: 100.0,
            return_20d: ret,
            is_strong: true,
            is_new_high: false,
        }
    }

    #[test]
    fn test_vcp_ranking_undefined_last() {
        let rows = vcp_report(
            vec![vcp("1111", Some(0.05)), vcp("2222", None), vcp("3333", Some(0.2))],
            &companies(),
        );
        let ids: Vec<&str> = rows.iter().map(|r| r.stock_id.as_str()).collect();
        assert_eq!(ids, vec!["3333", "1111", "2222"]);
    }

    #[test]
    fn test_vcp_enrichment() {
        let rows = vcp_report(vec![vcp("2330", Some(0.1)), vcp("9999", Some(0.2))], &companies());
        let known = rows.iter().find(|r| r.stock_id == "2330").unwrap();
        assert_eq!(known.stock_name, "台積電");
        assert_eq!(known.industry_category, "半導體業");
        let unknown = rows.iter().find(|r| r.stock_id == "9999").unwrap();
        assert_eq!(unknown.stock_name, "");
        assert_eq!(unknown.industry_category, "-");
    }

    #[test]
    fn test_bloom_ranking() {
        let mk = |id: &str, gap: f64| BloomMatch {
            stock_id: id.to_string(),
            date: day(),
            today_price: 50.0,
            second_high_55d: Some(48.0),
            gap_ratio: gap,
        };
        let rows = bloom_report(vec![mk("1111", 0.01), mk("2222", 0.08)], &companies());
        assert_eq!(rows[0].stock_id, "2222");
    }

    #[test]
    fn test_company_master_shape() {
        let records = vec![CompanyRecord {
            stock_id: "2330".to_string(),
            stock_name: "台積電".to_string(),
            industry_category: "半導體業".to_string(),
            industry_category2: "電子工業".to_string(),
            venue: Venue::Twse,
        }];
        let rows = company_master(&records);
        assert_eq!(rows[0].company_name, "台積電");
        assert_eq!(rows[0].product_mix, "-");
        assert_eq!(rows[0].industry_category2, "電子工業");
    }
}
