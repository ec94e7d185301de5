//! Industry category normalization.
//!
//! The upstream company list repeats a symbol once per industry tag, mixing
//! umbrella categories with the sub-sector ones (2330 arrives tagged both
//! 電子工業 and 半導體業). Duplicates are collapsed into two slots with the
//! most specific tag first.

use std::collections::HashSet;

/// Placeholder for an absent industry slot.
pub const NO_CATEGORY: &str = "-";

/// Tags that are not industries and must never survive into the universe.
pub const NON_INDUSTRY_TAGS: &[&str] = &["Index", "大盤", "所有證券"];

/// Electronic sub-sectors, more specific than the 電子工業 umbrella.
const SUB_SECTORS: &[&str] = &[
    "半導體業",
    "電腦及週邊設備業",
    "光電業",
    "通信網路業",
    "電子零組件業",
    "電子通路業",
    "資訊服務業",
    "其他電子業",
];

fn specificity(tag: &str) -> u8 {
    if SUB_SECTORS.contains(&tag) {
        2
    } else if tag == NO_CATEGORY {
        0
    } else {
        1
    }
}

/// Whether a tag is a usable industry category.
pub fn is_industry_tag(tag: &str) -> bool {
    !tag.is_empty() && tag != NO_CATEGORY && !NON_INDUSTRY_TAGS.contains(&tag)
}

/// Merge all industry tags seen for one symbol into two ordered slots.
///
/// Most specific first, ties broken lexicographically for determinism,
/// missing slots padded with `"-"`.
pub fn merge_categories(tags: &[String]) -> (String, String) {
    let mut seen = HashSet::new();
    let mut uniq: Vec<&str> = tags
        .iter()
        .map(|t| t.as_str())
        .filter(|t| is_industry_tag(t))
        .filter(|t| seen.insert(t.to_string()))
        .collect();

    uniq.sort_by(|a, b| {
        specificity(b)
            .cmp(&specificity(a))
            .then_with(|| a.cmp(b))
    });

    let first = uniq.first().copied().unwrap_or(NO_CATEGORY).to_string();
    let second = uniq.get(1).copied().unwrap_or(NO_CATEGORY).to_string();
    (first, second)
}
