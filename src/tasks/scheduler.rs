//! Cron-driven unattended mode.
//!
//! A 10-second tick checks each schedule for a slot that has passed within
//! the last minute and not yet fired; per-task bookkeeping keeps a slot
//! from firing twice.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use super::{DailyTask, MonthlyTask};
use crate::config::ScheduleConfig;
use crate::data::MarketDataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Daily,
    Monthly,
}

impl Slot {
    fn name(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }
}

struct ParsedSchedule {
    slot: Slot,
    schedule: Schedule,
}

/// Runs the daily and monthly tasks on their cron schedules.
pub struct TaskScheduler<P: MarketDataSource, S: MarketDataSource> {
    config: ScheduleConfig,
    daily: DailyTask<P, S>,
    monthly: MonthlyTask<P, S>,
    schedules: Vec<ParsedSchedule>,
    last_executions: Arc<RwLock<HashMap<Slot, DateTime<Utc>>>>,
}

impl<P: MarketDataSource, S: MarketDataSource> TaskScheduler<P, S> {
    pub fn new(
        config: ScheduleConfig,
        daily: DailyTask<P, S>,
        monthly: MonthlyTask<P, S>,
    ) -> Result<Self> {
        let mut schedules = Vec::new();
        if config.enabled {
            schedules.push(ParsedSchedule {
                slot: Slot::Daily,
                schedule: Schedule::from_str(&config.daily_cron)
                    .with_context(|| format!("Invalid daily cron: {}", config.daily_cron))?,
            });
            schedules.push(ParsedSchedule {
                slot: Slot::Monthly,
                schedule: Schedule::from_str(&config.monthly_cron)
                    .with_context(|| format!("Invalid monthly cron: {}", config.monthly_cron))?,
            });
            info!(
                daily = %config.daily_cron,
                monthly = %config.monthly_cron,
                "Scheduler configured"
            );
        }
        Ok(Self {
            config,
            daily,
            monthly,
            schedules,
            last_executions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Run the scheduler loop until the process is stopped.
    pub async fn run(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler disabled, not starting");
            return Ok(());
        }
        info!("Scheduler started");

        let mut tick = interval(Duration::from_secs(10));
        loop {
            tick.tick().await;
            let now = Utc::now();
            for parsed in &self.schedules {
                if self.should_execute(parsed.slot, &parsed.schedule, now).await {
                    self.execute(parsed.slot).await;
                }
            }
        }
    }

    /// A slot fires when a scheduled time passed within the last minute
    /// and nothing has executed for it since.
    async fn should_execute(&self, slot: Slot, schedule: &Schedule, now: DateTime<Utc>) -> bool {
        let last_exec = {
            let executions = self.last_executions.read().await;
            executions.get(&slot).copied()
        };
        let after = last_exec.unwrap_or_else(|| now - chrono::Duration::hours(1));

        for scheduled in schedule.after(&after).take(5) {
            if scheduled > now {
                break;
            }
            if now.signed_duration_since(scheduled) < chrono::Duration::seconds(60) {
                if let Some(last) = last_exec {
                    if last >= scheduled {
                        continue;
                    }
                }
                return true;
            }
        }
        false
    }

    async fn execute(&self, slot: Slot) {
        info!(task = slot.name(), "Executing scheduled task");
        {
            let mut executions = self.last_executions.write().await;
            executions.insert(slot, Utc::now());
        }

        match slot {
            Slot::Daily => match self.daily.run(None, true).await {
                Ok(report) => info!(task = slot.name(), "{}", report),
                Err(e) => error!(task = slot.name(), error = %e, "Scheduled task failed"),
            },
            Slot::Monthly => match self.monthly.run().await {
                Ok(report) => info!(task = slot.name(), "{}", report),
                Err(e) => error!(task = slot.name(), error = %e, "Scheduled task failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_crons_parse() {
        let config = ScheduleConfig::default();
        assert!(Schedule::from_str(&config.daily_cron).is_ok());
        assert!(Schedule::from_str(&config.monthly_cron).is_ok());
    }

    #[test]
    fn test_daily_cron_fires_weekdays_only() {
        let schedule = Schedule::from_str(&ScheduleConfig::default().daily_cron).unwrap();
        // Start from a known Monday
        let monday = DateTime::parse_from_rfc3339("2025-06-02T00:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let next: Vec<DateTime<Utc>> = schedule.after(&monday).take(5).collect();
        assert_eq!(next.len(), 5);
        for dt in &next {
            let weekday = dt.format("%u").to_string();
            let day: u32 = weekday.parse().unwrap();
            assert!(day <= 5, "fired on weekend: {}", dt);
        }
    }

    #[test]
    fn test_monthly_cron_fires_first_of_month() {
        let schedule = Schedule::from_str(&ScheduleConfig::default().monthly_cron).unwrap();
        let start = DateTime::parse_from_rfc3339("2025-06-15T00:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let next = schedule.after(&start).next().unwrap();
        assert_eq!(next.format("%d %H:%M").to_string(), "01 09:00");
    }
}
