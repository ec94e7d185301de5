//! Task orchestration: the daily screen, the monthly refresh, the trading
//! calendar gate, and the cron loop that drives them unattended.

pub mod calendar;
pub mod daily;
pub mod monthly;
pub mod scheduler;

pub use calendar::{TradingCalendar, WeekdayCalendar};
pub use daily::{DailyReport, DailyTask};
pub use monthly::{MonthlyReport, MonthlyTask};
pub use scheduler::TaskScheduler;
