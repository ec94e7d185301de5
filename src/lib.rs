//! twscreen - scheduled technical screener for Taiwan equities.
//!
//! Pulls daily prices from two upstream sources (a rate-limited API with a
//! free bulk fallback), persists them in SQLite, and runs two technical
//! screens: a VCP-style strength/new-high filter benchmarked against the
//! TAIEX, and a three-line bloom breakout filter.

pub mod calc;
pub mod config;
pub mod data;
pub mod report;
pub mod tasks;

pub use config::Settings;
